//! HTML rendering of a coverage report.

use std::fmt::Write;

use super::CoverageReport;

const STYLE: &str = r#"
    body { font-family: Arial, sans-serif; margin: 40px; background-color: #f4f4f4; }
    .coverage-summary { width: 90%; margin: auto; background: #fff; padding: 20px; border-radius: 8px; box-shadow: 0 0 10px rgba(0,0,0,0.1); }
    .coverage-bar { width: 100%; background-color: #ddd; border-radius: 25px; overflow: hidden; margin: 20px 0; }
    .coverage-bar-fill { height: 30px; background-color: #4CAF50; text-align: center; line-height: 30px; color: white; border-radius: 25px 0 0 25px; }
    .details { text-align: left; margin-top: 20px; }
    .endpoint-list { max-height: 300px; overflow-y: scroll; border: 1px solid #ccc; padding: 10px; border-radius: 5px; background-color: #f9f9f9; }
    .covered { color: green; }
    .uncovered { color: red; }
    .timestamp { margin-top: 20px; font-size: 0.9em; color: #555; }
    h1, h2 { text-align: center; }
"#;

fn escape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(c),
    }
  }
  out
}

fn endpoint_list(out: &mut String, class: &str, endpoints: &[String]) {
  out.push_str("      <div class=\"endpoint-list\">\n        <ul>\n");
  for ep in endpoints {
    let _ = writeln!(out, "          <li class=\"{class}\">{}</li>", escape(ep));
  }
  out.push_str("        </ul>\n      </div>\n");
}

/// A standalone HTML page: summary, coverage bar, both endpoint lists and the
/// generation time.
pub fn render_html(report: &CoverageReport) -> String {
  let pct = report.coverage_percentage;
  let mut out = String::new();

  out.push_str("<!DOCTYPE html>\n<html>\n<head>\n  <title>RESTler Coverage Report</title>\n");
  let _ = writeln!(out, "  <style>{STYLE}  </style>\n</head>\n<body>");
  out.push_str("  <div class=\"coverage-summary\">\n    <h1>RESTler Coverage Report</h1>\n");
  let _ = writeln!(out, "    <p><strong>Coverage Percentage:</strong> {pct}%</p>");
  let _ = writeln!(
    out,
    "    <div class=\"coverage-bar\">\n      <div class=\"coverage-bar-fill\" style=\"width: {pct}%\">{pct}%</div>\n    </div>"
  );

  out.push_str("    <div class=\"details\">\n");
  let _ = writeln!(out, "      <p><strong>Total Endpoints:</strong> {}</p>", report.total_endpoints);
  let _ = writeln!(out, "      <h2>Covered Endpoints ({}):</h2>", report.covered_endpoints.len());
  endpoint_list(&mut out, "covered", &report.covered_endpoints);
  let _ = writeln!(out, "      <h2>Uncovered Endpoints ({}):</h2>", report.uncovered_endpoints.len());
  endpoint_list(&mut out, "uncovered", &report.uncovered_endpoints);
  out.push_str("    </div>\n");

  let _ = writeln!(
    out,
    "    <div class=\"timestamp\">Report generated at: {}</div>",
    escape(&report.timestamp)
  );
  out.push_str("  </div>\n</body>\n</html>\n");
  out
}
