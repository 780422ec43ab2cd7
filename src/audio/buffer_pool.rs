// FramePool - lock-free buffer pool with dual SPSC queues
//
// Object pool built on two rtrb SPSC ring buffers so the capture callback
// never allocates. The callback pops an empty buffer from the POOL queue,
// fills it with mono samples, and pushes it onto the DATA queue; the detect
// worker consumes it and returns the emptied buffer to the pool.
//
// Buffer flow:
// 1. Capture callback pops empty buffer from POOL queue
// 2. Capture callback fills buffer with downmixed samples
// 3. Capture callback pushes filled buffer to DATA queue
// 4. Detect worker pops filled buffer from DATA queue
// 5. Detect worker copies samples out and processes them
// 6. Detect worker pushes the emptied buffer back to POOL queue

use rtrb::{Consumer, Producer, RingBuffer};

/// Default number of pre-allocated buffers in the pool
pub const DEFAULT_POOL_COUNT: usize = 16;

/// Sample buffer circulating through the pool
pub type SampleBuffer = Vec<f32>;

/// Queue ends used by the capture callback
pub struct CaptureChannels {
    /// Empty buffers ready to be filled
    pub pool_consumer: Consumer<SampleBuffer>,
    /// Filled buffers headed for the detect worker
    pub data_producer: Producer<SampleBuffer>,
}

/// Queue ends used by the detect worker
pub struct DetectChannels {
    /// Filled buffers from the capture callback
    pub data_consumer: Consumer<SampleBuffer>,
    /// Emptied buffers returned for reuse
    pub pool_producer: Producer<SampleBuffer>,
}

/// Lock-free frame pool
///
/// All heap allocation happens in `new`; push/pop on the queues is
/// wait-free, which keeps the capture callback real-time safe.
pub struct FramePool;

impl FramePool {
    /// Create a pool of `buffer_count` buffers of `buffer_size` samples
    ///
    /// # Panics
    /// Panics if either argument is 0.
    pub fn new(buffer_count: usize, buffer_size: usize) -> (CaptureChannels, DetectChannels) {
        assert!(buffer_count > 0, "buffer_count must be greater than 0");
        assert!(buffer_size > 0, "buffer_size must be greater than 0");

        let (mut pool_producer, pool_consumer) = RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = RingBuffer::new(buffer_count);

        // Pre-allocate every buffer up front and seed the pool queue
        for _ in 0..buffer_count {
            let buffer = Vec::with_capacity(buffer_size);
            pool_producer
                .push(buffer)
                .expect("pool queue must hold all pre-allocated buffers");
        }

        (
            CaptureChannels {
                pool_consumer,
                data_producer,
            },
            DetectChannels {
                data_consumer,
                pool_producer,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let (mut capture, mut detect) = FramePool::new(16, 256);

        let mut available = 0;
        while capture.pool_consumer.pop().is_ok() {
            available += 1;
        }
        assert_eq!(available, 16, "all buffers start in the pool queue");
        assert!(detect.data_consumer.pop().is_err(), "data queue starts empty");
    }

    #[test]
    fn test_buffer_circulation() {
        let (mut capture, mut detect) = FramePool::new(4, 128);

        // Capture side: fill and hand off
        let mut buffer = capture.pool_consumer.pop().unwrap();
        buffer.extend_from_slice(&[0.25; 64]);
        capture.data_producer.push(buffer).unwrap();

        // Detect side: consume and recycle
        let mut buffer = detect.data_consumer.pop().unwrap();
        assert_eq!(buffer.len(), 64);
        assert_eq!(buffer[0], 0.25);
        buffer.clear();
        detect.pool_producer.push(buffer).unwrap();

        let buffer = capture.pool_consumer.pop().unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 64);
    }

    #[test]
    fn test_exhausted_pool_reports_empty() {
        let (mut capture, _detect) = FramePool::new(2, 32);

        assert!(capture.pool_consumer.pop().is_ok());
        assert!(capture.pool_consumer.pop().is_ok());
        assert!(capture.pool_consumer.pop().is_err());
    }

    #[test]
    fn test_channels_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureChannels>();
        assert_send::<DetectChannels>();
    }

    #[test]
    #[should_panic(expected = "buffer_count must be greater than 0")]
    fn test_zero_buffer_count_panics() {
        FramePool::new(0, 256);
    }

    #[test]
    #[should_panic(expected = "buffer_size must be greater than 0")]
    fn test_zero_buffer_size_panics() {
        FramePool::new(16, 0);
    }
}
