use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use plotters::coord::Shift;
use plotters::prelude::*;
use regex::Regex;

const MOTION_TABLE: &str = "reg_param.txt";
const MAX_DISP_TABLE: &str = "maxDisp.txt";
const MAX_DISP_HEADER_ROWS: usize = 2;

/// One registration time point: rotation in degrees, displacement in mm.
/// The table's two trailing residual columns are validated but not retained.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionRow {
    pub t: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub d_s: f64,
    pub d_l: f64,
    pub d_p: f64,
}

pub fn parse_motion_table(path: &Path) -> Result<Vec<MotionRow>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read motion table: {:?}", path))?;

    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().with_context(|| {
                    format!("Bad value {:?} on line {} of {:?}", token, line_no + 1, path)
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if fields.len() != 9 {
            bail!(
                "Expected 9 columns on line {} of {:?}, found {}",
                line_no + 1,
                path,
                fields.len()
            );
        }
        rows.push(MotionRow {
            t: fields[0],
            roll: fields[1],
            pitch: fields[2],
            yaw: fields[3],
            d_s: fields[4],
            d_l: fields[5],
            d_p: fields[6],
        });
    }

    if rows.is_empty() {
        bail!("Motion table {:?} has no rows", path);
    }
    Ok(rows)
}

pub fn parse_max_disp(path: &Path) -> Result<Vec<f64>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read displacement table: {:?}", path))?;

    let mut values = Vec::new();
    for (line_no, line) in text.lines().enumerate().skip(MAX_DISP_HEADER_ROWS) {
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        let value = token.parse::<f64>().with_context(|| {
            format!("Bad value {:?} on line {} of {:?}", token, line_no + 1, path)
        })?;
        values.push(value);
    }

    if values.is_empty() {
        bail!("Displacement table {:?} has no rows", path);
    }
    Ok(values)
}

pub fn derive_subject_id(input: &Path) -> String {
    let raw = input.to_string_lossy();
    // A bare "." or "./" says nothing about the subject; look at the working
    // directory instead.
    let haystack = if raw.len() < 3 && raw.contains('.') {
        env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_else(|_| raw.to_string())
    } else {
        raw.into_owned()
    };

    let pattern = Regex::new(r"[A-Z]{3}\d{2,3}").unwrap();
    if let Some(found) = pattern.find(&haystack) {
        return found.as_str().to_string();
    }

    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or(haystack)
}

pub fn build_report(rest_dir: &Path, subject: &str) -> Result<PathBuf> {
    let motion = parse_motion_table(&rest_dir.join(MOTION_TABLE))?;
    let max_disp = parse_max_disp(&rest_dir.join(MAX_DISP_TABLE))?;

    let out_path = rest_dir.join(format!("{}_motion.png", subject));
    render_motion_figure(&out_path, subject, &motion, &max_disp)?;
    Ok(out_path)
}

fn render_motion_figure(
    out_path: &Path,
    subject: &str,
    motion: &[MotionRow],
    max_disp: &[f64],
) -> Result<()> {
    let root = BitMapBackend::new(out_path, (1200, 1000)).into_drawing_area();
    root.fill(&WHITE)?;
    let inner = root.titled(subject, ("sans-serif", 40))?;

    let (left, right) = inner.split_horizontally(560);
    let panels = left.split_evenly((2, 1));

    let time: Vec<f64> = motion.iter().map(|row| row.t).collect();
    draw_panel(
        &panels[0],
        "Rotation",
        "degree",
        &time,
        &[
            ("roll", motion.iter().map(|r| r.roll).collect()),
            ("pitch", motion.iter().map(|r| r.pitch).collect()),
            ("yaw", motion.iter().map(|r| r.yaw).collect()),
        ],
    )?;
    draw_panel(
        &panels[1],
        "Displacement",
        "mm",
        &time,
        &[
            ("dS", motion.iter().map(|r| r.d_s).collect()),
            ("dL", motion.iter().map(|r| r.d_l).collect()),
            ("dP", motion.iter().map(|r| r.d_p).collect()),
        ],
    )?;

    let disp_time: Vec<f64> = (0..max_disp.len()).map(|i| i as f64).collect();
    draw_panel(
        &right,
        "Maximum displacements",
        "mm",
        &disp_time,
        &[("maxDisp", max_disp.to_vec())],
    )?;

    root.present()
        .with_context(|| format!("Failed to write figure: {:?}", out_path))?;
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    title: &str,
    y_label: &str,
    time: &[f64],
    series: &[(&str, Vec<f64>)],
) -> Result<()> {
    let x_max = time.iter().copied().fold(1.0_f64, f64::max);
    let (y_min, y_max) =
        padded_bounds(series.iter().flat_map(|(_, values)| values.iter().copied()));

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(36)
        .y_label_area_size(48)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Time points")
        .y_desc(y_label)
        .draw()?;

    for (idx, (name, values)) in series.iter().enumerate() {
        let color = Palette99::pick(idx);
        chart
            .draw_series(LineSeries::new(
                time.iter().copied().zip(values.iter().copied()),
                color.stroke_width(2),
            ))?
            .label(*name)
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 16, y)], color.stroke_width(2))
            });
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    Ok(())
}

fn padded_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for value in values {
        min = min.min(value);
        max = max.max(value);
    }
    if !min.is_finite() || !max.is_finite() {
        return (-1.0, 1.0);
    }
    let pad = ((max - min) * 0.05).max(0.05);
    (min - pad, max + pad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn motion_table_columns_map_in_file_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MOTION_TABLE);
        fs::write(&path, "1 10 20 30 40 50 60 70 80\n").unwrap();

        let rows = parse_motion_table(&path).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.t, 1.0);
        assert_eq!(row.roll, 10.0);
        assert_eq!(row.pitch, 20.0);
        assert_eq!(row.yaw, 30.0);
        assert_eq!(row.d_s, 40.0);
        assert_eq!(row.d_l, 50.0);
        assert_eq!(row.d_p, 60.0);
    }

    #[test]
    fn rotation_series_preserves_row_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MOTION_TABLE);
        let mut table = String::new();
        for t in 0..6 {
            table.push_str(&format!("{t} {t} 0.1 -0.1 0.2 -0.2 0.3 1.0 0.9\n"));
        }
        fs::write(&path, table).unwrap();

        let rows = parse_motion_table(&path).unwrap();
        let roll: Vec<f64> = rows.iter().map(|r| r.roll).collect();
        assert_eq!(roll, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn max_disp_skips_its_two_header_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MAX_DISP_TABLE);
        fs::write(&path, "#max displacement\n#mm\n0.1\n0.2\n0.15\n").unwrap();

        assert_eq!(parse_max_disp(&path).unwrap(), vec![0.1, 0.2, 0.15]);
    }

    #[test]
    fn short_motion_rows_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MOTION_TABLE);
        fs::write(&path, "0 1 2\n").unwrap();

        assert!(parse_motion_table(&path).is_err());
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MAX_DISP_TABLE);
        fs::write(&path, "#h\n#h\nnot-a-number\n").unwrap();

        assert!(parse_max_disp(&path).is_err());
    }

    #[test]
    fn missing_tables_are_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(parse_motion_table(&dir.path().join(MOTION_TABLE)).is_err());
        assert!(parse_max_disp(&dir.path().join(MAX_DISP_TABLE)).is_err());
    }

    #[test]
    fn subject_id_comes_from_the_code_in_the_path() {
        assert_eq!(derive_subject_id(Path::new("/Users/kevin/NOR04_CKI")), "NOR04");
        assert_eq!(derive_subject_id(Path::new("/data/scans/ABC123/session1")), "ABC123");
    }

    #[test]
    fn subject_id_falls_back_to_the_final_component() {
        assert_eq!(derive_subject_id(Path::new("data/subject_x")), "subject_x");
    }

    #[test]
    fn writes_the_motion_figure_next_to_the_tables() {
        let rest = TempDir::new().unwrap();
        let mut table = String::new();
        for t in 0..10 {
            table.push_str(&format!("{t} 0.1 -0.2 0.05 0.3 -0.1 0.2 1.0 0.9\n"));
        }
        fs::write(rest.path().join(MOTION_TABLE), table).unwrap();
        fs::write(rest.path().join(MAX_DISP_TABLE), "#h\n#h\n0.1\n0.2\n0.15\n").unwrap();

        match build_report(rest.path(), "NOR04") {
            Ok(path) => {
                assert_eq!(path.file_name().unwrap(), "NOR04_motion.png");
                assert!(path.is_file());
            }
            // Headless CI images sometimes ship without system fonts; the
            // caption rendering is the only part that needs them.
            Err(e) if format!("{e:#}").to_lowercase().contains("font") => {}
            Err(e) => panic!("report failed: {e:#}"),
        }
    }
}
