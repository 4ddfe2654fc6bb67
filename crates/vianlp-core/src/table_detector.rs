//! Heuristic-based table detection for PDFs
//!
//! This module detects tables from positioned text cells using alignment
//! heuristics. It doesn't require ML models.
//!
//! The algorithm:
//! 1. Cluster cells into rows based on vertical alignment
//! 2. Detect table regions where consecutive rows share a column count
//! 3. Derive column boundaries from horizontal alignment
//! 4. Assign cells to columns, leaving missing cells empty

use crate::layout::{group_rows, TextCell};

/// A detected table with its cells organized in a grid
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTable {
    /// Table cells organized as rows; `None` marks an empty cell
    pub rows: Vec<Vec<Option<String>>>,
    /// Number of columns
    pub num_cols: usize,
    /// Bounding box of the table (x, y, width, height)
    pub bbox: (f32, f32, f32, f32),
}

/// Table detector configuration
#[derive(Debug, Clone)]
pub struct TableDetectorConfig {
    /// Tolerance for row alignment (points) - cells within this Y distance are in same row
    pub row_tolerance: f32,
    /// Tolerance for column alignment (points) - cells within this X distance are in same column
    pub col_tolerance: f32,
    /// Minimum cells on a page to look for tables at all
    pub min_cells: usize,
    /// Minimum rows to consider a region as a table
    pub min_rows: usize,
    /// Minimum columns to consider a region as a table
    pub min_cols: usize,
}

impl Default for TableDetectorConfig {
    fn default() -> Self {
        Self {
            row_tolerance: 5.0,  // 5 points (~1.7mm)
            col_tolerance: 10.0, // 10 points (~3.5mm)
            min_cells: 6,        // At least 6 cells (e.g., 2x3 or 3x2)
            min_rows: 2,
            min_cols: 2,
        }
    }
}

/// Table detector over text cells
#[derive(Debug, Clone, Default)]
pub struct TableDetector {
    config: TableDetectorConfig,
}

impl TableDetector {
    /// Create a new table detector with custom configuration
    pub fn with_config(config: TableDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TableDetectorConfig {
        &self.config
    }

    /// Detect tables on one page from its text cells
    pub fn detect(&self, cells: &[TextCell]) -> Vec<DetectedTable> {
        if cells.len() < self.config.min_cells {
            return Vec::new();
        }

        let rows = group_rows(cells, self.config.row_tolerance);
        let regions = self.find_table_regions(&rows);

        let tables: Vec<DetectedTable> = regions
            .iter()
            .filter_map(|region| self.build_table(region))
            .collect();

        tracing::debug!(
            cells = cells.len(),
            rows = rows.len(),
            tables = tables.len(),
            "Table detection finished"
        );
        tables
    }

    /// Find potential table regions (consecutive rows with similar column counts)
    fn find_table_regions<'a>(&self, rows: &[Vec<&'a TextCell>]) -> Vec<Vec<Vec<&'a TextCell>>> {
        let mut regions: Vec<Vec<Vec<&'a TextCell>>> = Vec::new();
        let mut current_region: Vec<Vec<&'a TextCell>> = Vec::new();
        let mut expected_cols: Option<usize> = None;

        for row in rows {
            let num_cells = row.len();

            // Rows with too few cells are headings or paragraphs, they close a region
            if num_cells < self.config.min_cols {
                if current_region.len() >= self.config.min_rows {
                    regions.push(std::mem::take(&mut current_region));
                } else {
                    current_region.clear();
                }
                expected_cols = None;
                continue;
            }

            match expected_cols {
                // Allow some flexibility in column count (+/- 1)
                Some(exp_cols) if num_cells.abs_diff(exp_cols) <= 1 => {
                    current_region.push(row.clone());
                }
                Some(_) => {
                    if current_region.len() >= self.config.min_rows {
                        regions.push(std::mem::take(&mut current_region));
                    }
                    current_region.clear();
                    current_region.push(row.clone());
                    expected_cols = Some(num_cells);
                }
                None => {
                    current_region.push(row.clone());
                    expected_cols = Some(num_cells);
                }
            }
        }

        if current_region.len() >= self.config.min_rows {
            regions.push(current_region);
        }

        regions
    }

    /// Build a DetectedTable from a region of rows
    fn build_table(&self, region: &[Vec<&TextCell>]) -> Option<DetectedTable> {
        if region.is_empty() {
            return None;
        }

        let col_boundaries = self.find_column_boundaries(region);
        let num_cols = col_boundaries.len().saturating_sub(1);

        if num_cols < self.config.min_cols {
            return None;
        }

        let mut table_rows: Vec<Vec<Option<String>>> = Vec::with_capacity(region.len());

        for row in region {
            let mut table_row: Vec<Option<String>> = vec![None; num_cols];

            for cell in row {
                let col_idx = find_column_index(cell, &col_boundaries);
                if col_idx >= num_cols {
                    continue;
                }
                // Merged cells: append with a space
                match &mut table_row[col_idx] {
                    Some(existing) => {
                        existing.push(' ');
                        existing.push_str(&cell.text);
                    }
                    slot @ None => *slot = Some(cell.text.clone()),
                }
            }

            table_rows.push(table_row);
        }

        Some(DetectedTable {
            rows: table_rows,
            num_cols,
            bbox: calculate_bbox(region),
        })
    }

    /// Find column boundaries from a table region
    fn find_column_boundaries(&self, region: &[Vec<&TextCell>]) -> Vec<f32> {
        let mut x_positions: Vec<f32> = region
            .iter()
            .flat_map(|row| row.iter().map(|c| c.x))
            .collect();

        x_positions.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let Some(&first) = x_positions.first() else {
            return Vec::new();
        };

        // Cluster left edges: a gap wider than the tolerance opens a new column
        let mut boundaries = vec![first];
        let mut last_x = first;
        for &x in &x_positions[1..] {
            if x - last_x > self.config.col_tolerance {
                boundaries.push(x);
            }
            last_x = x;
        }

        // Right edge of the last column
        if let Some(max_right) = region
            .iter()
            .flat_map(|row| row.iter().map(|c| c.right()))
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        {
            let last = boundaries.last().copied().unwrap_or(first);
            boundaries.push(max_right.max(last + 1.0));
        }

        boundaries
    }
}

/// Find which column a cell belongs to based on its left edge
///
/// Boundaries are the smallest left edge of each column cluster, so a cell's
/// left edge never sits left of its own column's boundary. Estimated glyph
/// widths are too rough for the cell centre to be reliable.
fn find_column_index(cell: &TextCell, boundaries: &[f32]) -> usize {
    for (i, window) in boundaries.windows(2).enumerate() {
        if cell.x >= window[0] && cell.x < window[1] {
            return i;
        }
    }

    if cell.x < boundaries.first().copied().unwrap_or(0.0) {
        return 0;
    }

    // If past the last boundary, assign to last column
    boundaries.len().saturating_sub(2)
}

/// Calculate bounding box for a region
fn calculate_bbox(region: &[Vec<&TextCell>]) -> (f32, f32, f32, f32) {
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;

    for row in region {
        for cell in row {
            min_x = min_x.min(cell.x);
            min_y = min_y.min(cell.y);
            max_x = max_x.max(cell.right());
            max_y = max_y.max(cell.bottom());
        }
    }

    (min_x, min_y, max_x - min_x, max_y - min_y)
}
