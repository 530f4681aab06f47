//! HTML dashboard

use crate::count_state::{CountSnapshot, StreamStatus};

fn status_color(status: StreamStatus) -> &'static str {
    match status {
        StreamStatus::Streaming => "#2ecc71",
        StreamStatus::Disconnected => "#e74c3c",
        StreamStatus::Reconnecting => "#f39c12",
        StreamStatus::Starting => "#3498db",
    }
}

/// Render the auto-refreshing dashboard page for a snapshot
pub fn render_dashboard(snapshot: &CountSnapshot) -> String {
    let last_update = snapshot
        .last_update
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let recent: String = snapshot
        .recent_events
        .iter()
        .rev()
        .take(10)
        .map(|e| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                e.timestamp.format("%H:%M:%S"),
                e.lane,
                e.track_id,
                escape_html(&e.class_name)
            )
        })
        .collect();

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta http-equiv="refresh" content="3">
  <title>Lane Counter</title>
  <style>
    body {{ font-family: Arial, sans-serif; background: #1a1a2e; color: #eee; margin: 0; padding: 20px; }}
    h1 {{ color: #e94560; }}
    .grid {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 20px; margin: 20px 0; }}
    .card {{ background: #16213e; border-radius: 10px; padding: 20px; text-align: center; }}
    .card h2 {{ margin: 0 0 10px; font-size: 1rem; color: #aaa; }}
    .card p {{ margin: 0; font-size: 2.5rem; font-weight: bold; color: #e94560; }}
    .status {{ display: inline-block; padding: 6px 16px; border-radius: 20px; background: {color}; color: #fff; font-weight: bold; }}
    table {{ border-collapse: collapse; }}
    td {{ padding: 2px 12px; }}
    a {{ color: #e94560; }}
    .footer {{ margin-top: 30px; font-size: 0.8rem; color: #555; }}
  </style>
</head>
<body>
  <h1>Lane Counter</h1>
  <p>Stream status: <span class="status">{status}</span></p>
  <div class="grid">
    <div class="card"><h2>Lane 1</h2><p>{lane1}</p></div>
    <div class="card"><h2>Lane 2</h2><p>{lane2}</p></div>
    <div class="card"><h2>Total</h2><p>{total}</p></div>
    <div class="card"><h2>Uptime</h2><p>{uptime:.1}s</p></div>
  </div>
  <p>Last update: {last_update}</p>
  <table>{recent}</table>
  <p><a href="/api/frame">Latest frame</a> &nbsp;|&nbsp; <a href="/api/stats">JSON stats</a> &nbsp;|&nbsp; <a href="/api/events">Count log</a></p>
  <div class="footer">Auto-refreshes every 3 s</div>
</body>
</html>"##,
        color = status_color(snapshot.stream_status),
        status = snapshot.stream_status,
        lane1 = snapshot.lane1,
        lane2 = snapshot.lane2,
        total = snapshot.total,
        uptime = snapshot.uptime_seconds,
        last_update = last_update,
        recent = recent,
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count_state::CountState;
    use crate::lane_config::Lane;

    #[test]
    fn test_dashboard_shows_counts_and_status() {
        let state = CountState::new(5);
        state.record_event(Lane::Two, 42, "<script>");
        state.publish(3, 4, StreamStatus::Reconnecting, None);

        let html = render_dashboard(&state.snapshot());
        assert!(html.contains(r#"content="3""#));
        assert!(html.contains("<h2>Lane 1</h2><p>3</p>"));
        assert!(html.contains("<h2>Lane 2</h2><p>4</p>"));
        assert!(html.contains("<h2>Total</h2><p>7</p>"));
        assert!(html.contains(">reconnecting</span>"));
        assert!(html.contains("#f39c12"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("Last update: N/A"));
    }

    #[test]
    fn test_dashboard_before_first_publish() {
        let html = render_dashboard(&CountState::new(5).snapshot());
        assert!(html.contains("Last update: N/A"));
        assert!(html.contains(">starting</span>"));
    }
}
