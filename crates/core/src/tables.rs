/// A piece of text drawn at a fixed position. `y` grows upward.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    pub text: String,
}

impl TextRun {
    fn estimated_end(&self) -> f32 {
        self.x + self.text.chars().count() as f32 * self.font_size * GLYPH_WIDTH_RATIO
    }
}

const LINE_TOLERANCE: f32 = 2.0;
const GLYPH_WIDTH_RATIO: f32 = 0.5;
const CELL_GAP_RATIO: f32 = 1.5;
const ANCHOR_TOLERANCE: f32 = 8.0;
const MIN_TABLE_ROWS: usize = 2;
const MIN_TABLE_COLUMNS: usize = 2;

pub const MISSING_SENTINEL: &str = "None";

#[derive(Debug, Clone)]
struct Cell {
    x: f32,
    text: String,
}

#[derive(Debug, Clone)]
struct Line {
    cells: Vec<Cell>,
}

impl Line {
    fn text(&self) -> String {
        self.cells
            .iter()
            .map(|cell| cell.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub type TableGrid = Vec<Vec<Option<String>>>;

/// Page text with table regions replaced by `[TABLE k]`, plus the grids.
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pub text: String,
    pub tables: Vec<TableGrid>,
}

pub fn analyze_page(runs: &[TextRun]) -> PageLayout {
    let lines = group_lines(runs);
    let mut text_lines = Vec::new();
    let mut tables = Vec::new();

    let mut index = 0;
    while index < lines.len() {
        let block_end = lines[index..]
            .iter()
            .position(|line| line.cells.len() < MIN_TABLE_COLUMNS)
            .map_or(lines.len(), |offset| index + offset);

        if block_end - index >= MIN_TABLE_ROWS {
            let grid = align_block(&lines[index..block_end])
                .filter(|grid| clean_table(grid).is_some());
            if let Some(grid) = grid {
                tables.push(grid);
                text_lines.push(format!("[TABLE {}]", tables.len()));
                index = block_end;
                continue;
            }
        }

        text_lines.push(lines[index].text());
        index += 1;
    }

    PageLayout {
        text: text_lines.join("\n"),
        tables,
    }
}

fn group_lines(runs: &[TextRun]) -> Vec<Line> {
    let mut sorted = runs
        .iter()
        .filter(|run| !run.text.trim().is_empty())
        .collect::<Vec<_>>();
    sorted.sort_by(|left, right| {
        right
            .y
            .total_cmp(&left.y)
            .then_with(|| left.x.total_cmp(&right.x))
    });

    let mut grouped: Vec<(f32, Vec<&TextRun>)> = Vec::new();
    for run in sorted {
        match grouped.last_mut() {
            Some((baseline, members)) if (*baseline - run.y).abs() <= LINE_TOLERANCE => {
                members.push(run);
            }
            _ => grouped.push((run.y, vec![run])),
        }
    }

    grouped
        .into_iter()
        .map(|(_, mut members)| {
            members.sort_by(|left, right| left.x.total_cmp(&right.x));
            Line {
                cells: split_cells(&members),
            }
        })
        .collect()
}

fn split_cells(runs: &[&TextRun]) -> Vec<Cell> {
    let mut cells: Vec<Cell> = Vec::new();
    let mut previous_end: Option<f32> = None;

    for run in runs {
        let text = run.text.trim();
        let wide_gap = previous_end
            .map(|end| run.x - end > run.font_size.max(1.0) * CELL_GAP_RATIO)
            .unwrap_or(true);

        match cells.last_mut() {
            Some(cell) if !wide_gap => {
                cell.text.push(' ');
                cell.text.push_str(text);
            }
            _ => cells.push(Cell {
                x: run.x,
                text: text.to_string(),
            }),
        }
        previous_end = Some(run.estimated_end());
    }

    cells
}

/// Columns are the clustered cell start positions. A block only counts as a
/// table when at least two of those columns are used by two or more rows.
fn align_block(lines: &[Line]) -> Option<TableGrid> {
    let mut starts = lines
        .iter()
        .flat_map(|line| line.cells.iter().map(|cell| cell.x))
        .collect::<Vec<_>>();
    starts.sort_by(f32::total_cmp);

    let mut anchors: Vec<(f32, usize)> = Vec::new();
    for x in starts {
        match anchors.last_mut() {
            Some((anchor, count)) if x - *anchor <= ANCHOR_TOLERANCE => *count += 1,
            _ => anchors.push((x, 1)),
        }
    }
    let shared = anchors
        .iter()
        .filter(|(_, count)| *count >= MIN_TABLE_ROWS)
        .count();
    if shared < MIN_TABLE_COLUMNS {
        return None;
    }
    let anchors = anchors.into_iter().map(|(anchor, _)| anchor).collect::<Vec<_>>();

    let mut grid = Vec::with_capacity(lines.len());
    for line in lines {
        let mut row: Vec<Option<String>> = vec![None; anchors.len()];
        for cell in &line.cells {
            let column = anchors
                .iter()
                .rposition(|anchor| cell.x + ANCHOR_TOLERANCE >= *anchor)
                .unwrap_or(0);
            match &mut row[column] {
                Some(existing) => {
                    existing.push(' ');
                    existing.push_str(&cell.text);
                }
                slot => *slot = Some(cell.text.clone()),
            }
        }
        grid.push(row);
    }

    Some(grid)
}

fn is_missing(cell: &Option<String>) -> bool {
    match cell {
        None => true,
        Some(value) => value.trim().is_empty(),
    }
}

fn is_sentinel(cell: &Option<String>) -> bool {
    cell.as_deref()
        .is_some_and(|value| value.trim() == MISSING_SENTINEL)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Drops all-missing and all-sentinel columns, then promotes the first row
/// to the header when more than one row remains. A single-row table keeps
/// its original column positions as labels.
pub fn clean_table(grid: &TableGrid) -> Option<CleanTable> {
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    if grid.is_empty() || width == 0 {
        return None;
    }

    let cell = |row: &Vec<Option<String>>, column: usize| row.get(column).cloned().flatten();
    let kept = (0..width)
        .filter(|column| {
            let values = grid.iter().map(|row| cell(row, *column)).collect::<Vec<_>>();
            !values.iter().all(is_missing) && !values.iter().all(is_sentinel)
        })
        .collect::<Vec<_>>();

    if kept.is_empty() {
        return None;
    }

    let mut rows = grid
        .iter()
        .map(|row| {
            kept.iter()
                .map(|column| cell(row, *column).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let header = if rows.len() > 1 {
        rows.remove(0)
    } else {
        kept.iter().map(|column| column.to_string()).collect()
    };

    Some(CleanTable { header, rows })
}

pub fn render_markdown(table: &CleanTable) -> String {
    let row_line = |cells: &[String]| {
        let escaped = cells
            .iter()
            .map(|cell| cell.trim().replace('|', "\\|"))
            .collect::<Vec<_>>();
        format!("| {} |", escaped.join(" | "))
    };

    let mut lines = Vec::with_capacity(table.rows.len() + 2);
    lines.push(row_line(&table.header));
    lines.push(format!(
        "|{}|",
        vec![" --- "; table.header.len()].join("|")
    ));
    for row in &table.rows {
        lines.push(row_line(row));
    }
    lines.join("\n")
}

pub fn tables_to_markdown(grids: &[TableGrid]) -> Option<String> {
    let rendered = grids
        .iter()
        .filter_map(clean_table)
        .map(|table| render_markdown(&table))
        .collect::<Vec<_>>();

    if rendered.is_empty() {
        None
    } else {
        Some(rendered.join("\n\n"))
    }
}
