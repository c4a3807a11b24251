//! Interactive chart export.
//!
//! Produces one self-contained HTML page: the figure as JSON plus the
//! renderer script, both inline. A layout with one panel is a single
//! time-series chart; several panels are stacked vertically on a single
//! shared time axis, so zooming one zooms all.
//!
//! The figure follows the plotly.js `{data, layout}` shape so the live API
//! can serve it to a plotly front end unchanged.

use std::path::PathBuf;

use serde_json::{Map, Value as Json, json};

use super::{ExportError, Exporter, RunInfo, write_file};
use crate::store::Snapshot;

/// Canvas renderer for the embedded figure.
const RENDERER: &str = include_str!("../../assets/chart.js");

/// Height of one stacked panel, in pixels.
const PANEL_HEIGHT: usize = 320;

/// One vertical panel of a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub title: &'static str,
    pub y_title: &'static str,
    /// `None` plots every column present in the snapshot.
    pub columns: Option<Vec<&'static str>>,
}

impl Panel {
    pub fn columns(title: &'static str, y_title: &'static str, columns: &[&'static str]) -> Self {
        Self {
            title,
            y_title,
            columns: Some(columns.to_vec()),
        }
    }

    pub fn all_columns(y_title: &'static str) -> Self {
        Self {
            title: "",
            y_title,
            columns: None,
        }
    }
}

/// Title and panels of an exported chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartLayout {
    pub title: &'static str,
    pub panels: Vec<Panel>,
}

impl ChartLayout {
    pub fn new(title: &'static str) -> Self {
        Self {
            title,
            panels: Vec::new(),
        }
    }

    pub fn panel(mut self, panel: Panel) -> Self {
        self.panels.push(panel);
        self
    }
}

/// Writes `<run-start>_<collector>.html` into a directory.
#[derive(Debug, Clone)]
pub struct ChartExporter {
    dir: PathBuf,
    layout: ChartLayout,
}

impl ChartExporter {
    pub fn new(dir: impl Into<PathBuf>, layout: ChartLayout) -> Self {
        Self {
            dir: dir.into(),
            layout,
        }
    }
}

impl Exporter for ChartExporter {
    fn name(&self) -> &'static str {
        "chart"
    }

    fn export(&self, run: &RunInfo, snapshot: &Snapshot) -> Result<Option<PathBuf>, ExportError> {
        if snapshot.is_empty() {
            return Ok(None);
        }
        let html = render_html(&self.layout, snapshot)?;
        let path = write_file(&self.dir, &run.file_name("html"), &html)?;
        Ok(Some(path))
    }
}

/// Builds the plotly figure (`{"data": [...], "layout": {...}}`).
pub fn figure(layout: &ChartLayout, snapshot: &Snapshot) -> Json {
    let x: Vec<String> = snapshot.iter().map(|s| s.timestamp_string()).collect();
    let all_columns = snapshot.columns();
    let stacked = layout.panels.len() > 1;

    let mut traces = Vec::new();
    let mut fig_layout = Map::new();
    fig_layout.insert("title".into(), json!({ "text": layout.title }));

    for (idx, panel) in layout.panels.iter().enumerate() {
        // Panels differ only in their y axis; `x` is shared.
        let axis = if idx == 0 {
            String::new()
        } else {
            (idx + 1).to_string()
        };
        let columns = panel.columns.as_deref().unwrap_or(&all_columns);

        for column in columns {
            let y: Vec<Option<crate::sample::Value>> =
                snapshot.iter().map(|s| s.get(column)).collect();
            traces.push(json!({
                "type": "scatter",
                "mode": "lines",
                "name": column,
                "x": x,
                "y": y,
                "xaxis": "x",
                "yaxis": format!("y{}", axis),
            }));
        }

        fig_layout.insert(
            format!("yaxis{}", axis),
            json!({ "title": { "text": panel.y_title } }),
        );
    }

    if stacked {
        let rows = layout.panels.len();
        fig_layout.insert(
            "grid".into(),
            json!({ "rows": rows, "columns": 1, "pattern": "coupled" }),
        );
        fig_layout.insert("height".into(), json!(PANEL_HEIGHT * rows));

        let annotations: Vec<Json> = layout
            .panels
            .iter()
            .enumerate()
            .map(|(idx, panel)| {
                json!({
                    "text": panel.title,
                    "showarrow": false,
                    "xref": "paper",
                    "yref": "paper",
                    "x": 0.5,
                    "y": 1.0 - idx as f64 / rows as f64,
                    "xanchor": "center",
                    "yanchor": "bottom",
                })
            })
            .collect();
        fig_layout.insert("annotations".into(), Json::Array(annotations));
    }

    json!({ "data": traces, "layout": fig_layout })
}

/// Renders a standalone HTML page for the snapshot. Needs no network access.
pub fn render_html(layout: &ChartLayout, snapshot: &Snapshot) -> Result<String, ExportError> {
    // "</" inside a script block would end it early.
    let figure = serde_json::to_string(&figure(layout, snapshot))?.replace("</", "<\\/");

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 16px; }}
#tip {{ font-size: 12px; min-height: 4em; }}
</style>
</head>
<body>
<div id="chart"></div>
<pre id="tip"></pre>
<script type="application/json" id="figure">{figure}</script>
<script>
{renderer}
</script>
</body>
</html>
"#,
        title = layout.title,
        figure = figure,
        renderer = RENDERER,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Metrics, Sample, Value};
    use crate::store::TimeSeries;

    fn series(rows: usize) -> Snapshot {
        let series = TimeSeries::new();
        for i in 0..rows {
            let metrics: Metrics = [
                ("us", Value::Int(i as i64)),
                ("sy", Value::Int(1)),
                ("free", Value::Float(10.5)),
            ]
            .into_iter()
            .collect();
            series.append(Sample::now(metrics));
        }
        series.snapshot()
    }

    #[test]
    fn test_single_panel_plots_every_column() {
        let layout = ChartLayout::new("Device MemInfo").panel(Panel::all_columns("memory usage(MB)"));
        let fig = figure(&layout, &series(3));

        let data = fig["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0]["name"], "us");
        assert_eq!(data[0]["x"].as_array().unwrap().len(), 3);
        assert_eq!(fig["layout"]["yaxis"]["title"]["text"], "memory usage(MB)");
        assert!(fig["layout"].get("grid").is_none());
    }

    #[test]
    fn test_stacked_panels_share_time_axis() {
        let layout = ChartLayout::new("Device VmStat")
            .panel(Panel::columns("CPU Info", "Usage(%)", &["us", "sy"]))
            .panel(Panel::columns("Memory Info", "Memory Usage(MB)", &["free"]));
        let fig = figure(&layout, &series(2));

        let data = fig["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[2]["yaxis"], "y2");
        assert!(data.iter().all(|t| t["xaxis"] == "x"));
        assert_eq!(fig["layout"]["grid"]["rows"], 2);
        assert_eq!(fig["layout"]["grid"]["pattern"], "coupled");
        assert_eq!(fig["layout"]["yaxis2"]["title"]["text"], "Memory Usage(MB)");
        assert_eq!(fig["layout"]["annotations"][1]["text"], "Memory Info");
    }

    #[test]
    fn test_missing_column_plots_nulls() {
        let layout =
            ChartLayout::new("t").panel(Panel::columns("IO Info", "IO Through(KB)", &["bi"]));
        let fig = figure(&layout, &series(2));
        assert_eq!(fig["data"][0]["y"], json!([null, null]));
    }

    #[test]
    fn test_vmstat_panels_zoom_together() {
        use crate::parser::{SampleParser, VmStatParser};

        let layout = VmStatParser::new().chart_layout();
        let fig = figure(&layout, &series(1));
        let data = fig["data"].as_array().unwrap();
        assert_eq!(data.len(), 12);

        // One x axis for every panel, one y axis per panel.
        assert!(data.iter().all(|t| t["xaxis"] == "x"));
        let yaxes: Vec<&str> = data.iter().map(|t| t["yaxis"].as_str().unwrap()).collect();
        assert_eq!(&yaxes[..4], ["y"; 4]);
        assert_eq!(&yaxes[4..8], ["y2"; 4]);
        assert_eq!(&yaxes[8..], ["y3"; 4]);
        assert!(fig["layout"].get("xaxis2").is_none());
        assert!(fig["layout"].get("xaxis3").is_none());
        assert_eq!(fig["layout"]["yaxis3"]["title"]["text"], "IO Through(KB)");
    }

    #[test]
    fn test_render_html_is_self_contained() {
        let layout = ChartLayout::new("Device MemInfo").panel(Panel::all_columns("MB"));
        let html = render_html(&layout, &series(1)).unwrap();
        assert!(html.contains("<title>Device MemInfo</title>"));
        assert!(!html.contains("<script src"));
        assert!(!html.contains("http://") && !html.contains("https://"));
        assert!(html.contains(RENDERER));
        assert!(html.contains("\"name\":\"free\""));
    }

    #[test]
    fn test_render_html_escapes_script_end() {
        let layout = ChartLayout::new("x")
            .panel(Panel::columns("</script>", "MB", &["us"]))
            .panel(Panel::columns("IO Info", "KB", &["sy"]));
        let html = render_html(&layout, &series(1)).unwrap();
        assert_eq!(html.matches("</script>").count(), 2);
        assert!(html.contains("<\\/script>"));
    }

    #[test]
    fn test_export_skips_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ChartExporter::new(dir.path(), ChartLayout::new("x"));
        let run = RunInfo::new("meminfo", crate::sample::local_now());
        assert!(exporter.export(&run, &Snapshot::default()).unwrap().is_none());
    }

    #[test]
    fn test_export_writes_html() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ChartExporter::new(dir.path(), ChartLayout::new("x").panel(Panel::all_columns("MB")));
        let run = RunInfo::new("meminfo", crate::sample::local_now());
        let path = exporter.export(&run, &series(2)).unwrap().unwrap();
        assert_eq!(path.extension().unwrap(), "html");
        assert!(std::fs::read_to_string(path).unwrap().contains("id=\"figure\""));
    }
}
