// KeyLayout - read-only scannable keyboard structure
//
// The layout collaborator owns file validation; the scan controller only
// requires that the layout be non-empty. Pages, rows, and keys flatten
// into linear scan units (or per-row groups for row-column mode) in
// document order.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

fn default_multiplier() -> f32 {
    1.0
}

/// One key on the virtual keyboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDef {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Per-key dwell scaling; keys needing more reaction time set > 1.0
    #[serde(default = "default_multiplier")]
    pub dwell_multiplier: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRow {
    pub keys: Vec<KeyDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPage {
    #[serde(default)]
    pub name: Option<String>,
    pub rows: Vec<KeyRow>,
}

/// Ordered pages of rows of keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLayout {
    pub pages: Vec<KeyPage>,
}

/// One scannable unit with its position in the layout
#[derive(Debug, Clone, PartialEq)]
pub struct ScanUnit {
    pub key_id: String,
    pub dwell_multiplier: f32,
    pub page: usize,
    pub row: usize,
    pub col: usize,
}

/// A scannable row for row-column mode
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub page: usize,
    pub row: usize,
    pub units: Vec<ScanUnit>,
}

impl KeyLayout {
    /// Load a layout from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(&path).map_err(|e| ConfigError::LayoutUnreadable {
                reason: format!("{}: {}", path.as_ref().display(), e),
            })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::LayoutUnreadable {
            reason: e.to_string(),
        })
    }

    pub fn key_count(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|page| &page.rows)
            .map(|row| row.keys.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }

    /// Every key in document order, for linear scanning
    pub fn flatten(&self) -> Vec<ScanUnit> {
        let mut units = Vec::with_capacity(self.key_count());
        for (page_index, page) in self.pages.iter().enumerate() {
            for (row_index, row) in page.rows.iter().enumerate() {
                for (col_index, key) in row.keys.iter().enumerate() {
                    units.push(ScanUnit {
                        key_id: key.id.clone(),
                        dwell_multiplier: key.dwell_multiplier,
                        page: page_index,
                        row: row_index,
                        col: col_index,
                    });
                }
            }
        }
        units
    }

    /// Non-empty rows in document order, for row-column scanning
    pub fn scan_rows(&self) -> Vec<ScanRow> {
        let mut rows = Vec::new();
        for (page_index, page) in self.pages.iter().enumerate() {
            for (row_index, row) in page.rows.iter().enumerate() {
                if row.keys.is_empty() {
                    continue;
                }
                let units = row
                    .keys
                    .iter()
                    .enumerate()
                    .map(|(col_index, key)| ScanUnit {
                        key_id: key.id.clone(),
                        dwell_multiplier: key.dwell_multiplier,
                        page: page_index,
                        row: row_index,
                        col: col_index,
                    })
                    .collect();
                rows.push(ScanRow {
                    page: page_index,
                    row: row_index,
                    units,
                });
            }
        }
        rows
    }
}

/// Convenience constructor used by tests and the CLI simulator
pub fn linear_layout(ids: &[&str]) -> KeyLayout {
    KeyLayout {
        pages: vec![KeyPage {
            name: None,
            rows: vec![KeyRow {
                keys: ids
                    .iter()
                    .map(|id| KeyDef {
                        id: id.to_string(),
                        label: None,
                        dwell_multiplier: 1.0,
                    })
                    .collect(),
            }],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_page_layout() -> KeyLayout {
        serde_json::from_str(
            r#"{
                "pages": [
                    {
                        "name": "letters",
                        "rows": [
                            {"keys": [{"id": "a"}, {"id": "b", "dwell_multiplier": 2.0}]},
                            {"keys": [{"id": "c"}]}
                        ]
                    },
                    {
                        "rows": [
                            {"keys": []},
                            {"keys": [{"id": "space", "label": "Space"}]}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_key_count_and_flatten_order() {
        let layout = two_page_layout();
        assert_eq!(layout.key_count(), 4);
        assert!(!layout.is_empty());

        let units = layout.flatten();
        let ids: Vec<&str> = units.iter().map(|u| u.key_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "space"]);
        assert_eq!(units[1].dwell_multiplier, 2.0);
        assert_eq!(units[3].page, 1);
    }

    #[test]
    fn test_scan_rows_skip_empty() {
        let layout = two_page_layout();
        let rows = layout.scan_rows();
        assert_eq!(rows.len(), 3, "empty row is not scannable");
        assert_eq!(rows[0].units.len(), 2);
        assert_eq!(rows[2].units[0].key_id, "space");
    }

    #[test]
    fn test_default_multiplier_applied() {
        let layout: KeyLayout =
            serde_json::from_str(r#"{"pages": [{"rows": [{"keys": [{"id": "x"}]}]}]}"#).unwrap();
        assert_eq!(layout.flatten()[0].dwell_multiplier, 1.0);
    }

    #[test]
    fn test_empty_layout_detected() {
        let layout: KeyLayout = serde_json::from_str(r#"{"pages": []}"#).unwrap();
        assert!(layout.is_empty());
        assert!(layout.flatten().is_empty());
    }

    #[test]
    fn test_from_file_missing_is_unreadable() {
        let result = KeyLayout::from_file("/nonexistent/layout.json");
        assert!(matches!(
            result,
            Err(ConfigError::LayoutUnreadable { .. })
        ));
    }

    #[test]
    fn test_linear_layout_helper() {
        let layout = linear_layout(&["a", "b", "c"]);
        assert_eq!(layout.key_count(), 3);
        assert_eq!(layout.scan_rows().len(), 1);
    }
}
