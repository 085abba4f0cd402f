//! Whitespace/alignment ("stream") table detection over positioned text.
//!
//! Pure geometry, no pdfium types: [`crate::tables::extract`] converts page
//! text into [`TextBox`]es and this module turns them into string grids.
//!
//! 1. Boxes whose text contains runs of two or more spaces are split, since
//!    pdfium often reports a whole table row as one segment.
//! 2. Boxes are clustered into lines by vertical center.
//! 3. Within a line, boxes closer than `column_gap` merge into one span.
//! 4. Consecutive lines with at least `min_columns` spans form a run.
//! 5. Column intervals are the union of overlapping span intervals across
//!    the run; every span lands in the interval containing it.
//!
//! Coordinates are PDF user space: y grows upwards.

/// A piece of text with its bounding rectangle, in points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub text: String,
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl TextBox {
    pub fn new(text: impl Into<String>, left: f32, bottom: f32, right: f32, top: f32) -> Self {
        Self {
            text: text.into(),
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn height(&self) -> f32 {
        (self.top - self.bottom).abs()
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }
}

/// Tuning knobs for [`detect_tables`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOptions {
    /// Max center distance for two boxes to share a line, as a fraction of
    /// the taller line height.
    pub row_tolerance: f32,
    /// Horizontal gap, in points, that separates two cells on a line.
    pub column_gap: f32,
    pub min_rows: usize,
    pub min_columns: usize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            row_tolerance: 0.5,
            column_gap: 10.0,
            min_rows: 2,
            min_columns: 2,
        }
    }
}

#[derive(Debug)]
struct Line {
    center_y: f32,
    height: f32,
    boxes: Vec<TextBox>,
}

#[derive(Debug, Clone)]
struct Span {
    left: f32,
    right: f32,
    text: String,
}

/// Detect tables on one page. Grids are returned top to bottom.
pub fn detect_tables(boxes: Vec<TextBox>, opts: &LayoutOptions) -> Vec<Vec<Vec<String>>> {
    let boxes: Vec<TextBox> = boxes
        .iter()
        .flat_map(split_on_wide_spaces)
        .filter(|b| !b.text.trim().is_empty())
        .collect();
    if boxes.is_empty() {
        return Vec::new();
    }

    let lines = cluster_lines(boxes, opts.row_tolerance);
    let mut grids = Vec::new();
    let mut run: Vec<Vec<Span>> = Vec::new();

    for line in &lines {
        let spans = line_spans(line, opts.column_gap);
        if spans.len() >= opts.min_columns {
            run.push(spans);
            continue;
        }
        flush_run(&mut run, opts, &mut grids);
    }
    flush_run(&mut run, opts, &mut grids);
    grids
}

fn flush_run(run: &mut Vec<Vec<Span>>, opts: &LayoutOptions, grids: &mut Vec<Vec<Vec<String>>>) {
    if run.len() >= opts.min_rows {
        if let Some(grid) = build_grid(run, opts.min_columns) {
            grids.push(grid);
        }
    }
    run.clear();
}

/// Split `b` wherever its text has two or more consecutive spaces.
///
/// Piece positions are estimated from character offsets, assuming a
/// uniform advance across the box.
pub fn split_on_wide_spaces(b: &TextBox) -> Vec<TextBox> {
    let chars: Vec<char> = b.text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let advance = (b.right - b.left) / chars.len() as f32;

    let mut pieces: Vec<(usize, usize)> = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut spaces = 0;
    for (i, c) in chars.iter().enumerate() {
        if c.is_whitespace() {
            spaces += 1;
            continue;
        }
        match start {
            Some(s) if spaces >= 2 => {
                pieces.push((s, end));
                start = Some(i);
            }
            None => start = Some(i),
            Some(_) => {}
        }
        spaces = 0;
        end = i + 1;
    }
    if let Some(s) = start {
        pieces.push((s, end));
    }

    pieces
        .into_iter()
        .map(|(s, e)| TextBox {
            text: chars[s..e].iter().collect(),
            left: b.left + s as f32 * advance,
            right: b.left + e as f32 * advance,
            bottom: b.bottom,
            top: b.top,
        })
        .collect()
}

fn cluster_lines(mut boxes: Vec<TextBox>, tolerance: f32) -> Vec<Line> {
    boxes.sort_by(|a, b| b.center_y().total_cmp(&a.center_y()));

    let mut lines: Vec<Line> = Vec::new();
    for b in boxes {
        let joins = lines.last().is_some_and(|line| {
            let scale = line.height.max(b.height()).max(1.0);
            (line.center_y - b.center_y()).abs() <= tolerance * scale
        });
        match lines.last_mut() {
            Some(line) if joins => {
                let n = line.boxes.len() as f32;
                line.center_y = (line.center_y * n + b.center_y()) / (n + 1.0);
                line.height = line.height.max(b.height());
                line.boxes.push(b);
            }
            _ => lines.push(Line {
                center_y: b.center_y(),
                height: b.height(),
                boxes: vec![b],
            }),
        }
    }
    for line in &mut lines {
        line.boxes.sort_by(|a, b| a.left.total_cmp(&b.left));
    }
    lines
}

/// Merge a line's boxes into cell spans separated by at least `gap`.
fn line_spans(line: &Line, gap: f32) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    for b in &line.boxes {
        let text = b.text.trim();
        match spans.last_mut() {
            Some(span) if b.left - span.right < gap => {
                if b.left - span.right > 1.0 && !span.text.ends_with(' ') {
                    span.text.push(' ');
                }
                span.text.push_str(text);
                span.right = span.right.max(b.right);
            }
            _ => spans.push(Span {
                left: b.left,
                right: b.right,
                text: text.to_string(),
            }),
        }
    }
    spans
}

/// Column intervals are the union of overlapping spans across the run.
fn build_grid(run: &[Vec<Span>], min_columns: usize) -> Option<Vec<Vec<String>>> {
    let mut intervals: Vec<(f32, f32)> = run
        .iter()
        .flatten()
        .map(|s| (s.left, s.right))
        .collect();
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut columns: Vec<(f32, f32)> = Vec::new();
    for (l, r) in intervals {
        match columns.last_mut() {
            Some(col) if l <= col.1 => col.1 = col.1.max(r),
            _ => columns.push((l, r)),
        }
    }
    if columns.len() < min_columns {
        return None;
    }

    let grid = run
        .iter()
        .map(|spans| {
            let mut row = vec![String::new(); columns.len()];
            for span in spans {
                let idx = columns
                    .iter()
                    .position(|&(l, r)| span.left >= l && span.left <= r)
                    .unwrap_or(columns.len() - 1);
                if !row[idx].is_empty() {
                    row[idx].push(' ');
                }
                row[idx].push_str(&span.text);
            }
            row
        })
        .collect();
    Some(grid)
}
