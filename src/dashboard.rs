use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::{config::Settings, radar::RadarCache, ranking::RankingService, utils::now_ts};

#[derive(Clone)]
pub struct DashboardState {
    pub settings: Settings,
    pub radar: RadarCache,
    pub ranking: Arc<RankingService>,
}

pub async fn serve_dashboard(
    settings: Settings,
    radar: RadarCache,
    ranking: Arc<RankingService>,
) -> Result<()> {
    let state = DashboardState {
        settings: settings.clone(),
        radar,
        ranking,
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/api/summary", get(api_summary))
        .route("/api/radar", get(api_radar))
        .route("/api/rankings", get(api_rankings))
        .route("/api/health", get(api_health))
        .route("/api/refresh", post(api_refresh))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr =
        format!("{}:{}", settings.dashboard_host, settings.dashboard_port).parse()?;

    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(State(st): State<DashboardState>) -> impl IntoResponse {
    Html(render_index_html(
        &st.settings.dashboard_host,
        st.settings.dashboard_port,
        &st.settings.run_mode,
    ))
}

fn render_index_html(host: &str, port: u16, mode: &str) -> String {
    // Single-file UI, no build step, same approach as the old dashboard.
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>BotRadar • Dashboard</title>
    <style>
      :root {{
        --bg: #0b1220;
        --panel: rgba(255,255,255,0.06);
        --stroke: rgba(255,255,255,0.12);
        --text: rgba(255,255,255,0.92);
        --muted: rgba(255,255,255,0.65);
        --good: #33d17a;
        --bad: #ff4d4d;
        --warn: #ffcc00;
      }}
      * {{ box-sizing: border-box; }}
      body {{
        margin: 0;
        font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial;
        color: var(--text);
        background: var(--bg);
      }}
      .wrap {{ max-width: 1100px; margin: 0 auto; padding: 22px 18px 42px; }}
      .topbar {{
        display: flex; align-items: center; justify-content: space-between; gap: 12px;
        padding: 14px 16px; border: 1px solid var(--stroke); border-radius: 14px;
        background: var(--panel);
      }}
      .title {{ font-weight: 800; }}
      .subtitle {{ color: var(--muted); font-size: 12px; margin-top: 2px; }}
      .card {{
        border: 1px solid var(--stroke); border-radius: 14px; background: var(--panel);
        margin-top: 14px; overflow: hidden;
      }}
      .card .hd {{ padding: 12px 14px; border-bottom: 1px solid var(--stroke); font-weight: 800; }}
      .card .bd {{ padding: 12px 14px; }}
      table {{ width: 100%; border-collapse: collapse; }}
      th, td {{ padding: 9px 10px; border-bottom: 1px solid rgba(255,255,255,0.07); }}
      th {{ text-align: left; color: var(--muted); font-size: 12px; }}
      td {{ font-size: 13px; }}
      .good {{ color: var(--good); }}
      .bad {{ color: var(--bad); }}
      .warn {{ color: var(--warn); }}
      .btn {{
        cursor: pointer; padding: 8px 10px; border-radius: 10px;
        border: 1px solid var(--stroke); background: rgba(255,255,255,0.05);
        color: var(--text); font-weight: 700; font-size: 12px;
      }}
      .muted {{ color: var(--muted); font-size: 12px; }}
    </style>
  </head>
  <body>
    <div class="wrap">
      <div class="topbar">
        <div>
          <div class="title">BotRadar • Dashboard</div>
          <div class="subtitle">Local: {host}:{port} • mode=<b>{mode}</b></div>
        </div>
        <div>
          <span class="muted" id="statusText">starting…</span>
          <button class="btn" id="refreshBtn">Refresh</button>
        </div>
      </div>

      <div class="card">
        <div class="hd">Radar <span class="muted" id="radarMeta"></span></div>
        <div class="bd">
          <table>
            <thead><tr><th>Bot</th><th>Status</th><th>Reason</th><th>Ops since pattern</th><th>Updated</th></tr></thead>
            <tbody id="radarBody"></tbody>
          </table>
        </div>
      </div>

      <div class="card">
        <div class="hd">Rankings</div>
        <div class="bd">
          <table>
            <thead><tr><th>#</th><th>Bot</th><th>Strategy</th><th>Accuracy</th><th>Ops</th><th>Risk</th></tr></thead>
            <tbody id="rankBody"></tbody>
          </table>
        </div>
      </div>
    </div>

    <script>
      async function getJson(url) {{
        const r = await fetch(url);
        if (!r.ok) throw new Error(url + " -> " + r.status);
        return r.json();
      }}

      function esc(s) {{
        return String(s ?? "").replace(/[&<>"]/g, c => ({{"&":"&amp;","<":"&lt;",">":"&gt;",'"':"&quot;"}})[c]);
      }}

      async function refresh() {{
        try {{
          const [radar, ranks] = await Promise.all([
            getJson("/api/radar"),
            getJson("/api/rankings"),
          ]);

          const st = document.getElementById("statusText");
          st.textContent = radar.connected ? "connected" : (radar.error || "disconnected (local data)");
          st.className = "muted " + (radar.connected ? "good" : "warn");
          document.getElementById("radarMeta").textContent =
            `${{radar.counts.active}} active • ${{radar.counts.at_risk}} at risk`;

          document.getElementById("radarBody").innerHTML = radar.bots.map(b => `
            <tr>
              <td>${{esc(b.bot_name)}}</td>
              <td class="${{b.is_safe_to_operate ? "good" : "bad"}}">${{b.is_safe_to_operate ? "ACTIVE" : "AT RISK"}}</td>
              <td>${{esc(b.reason)}}</td>
              <td>${{b.operations_since_last_pattern}}</td>
              <td class="muted">${{esc(b.last_updated)}}</td>
            </tr>`).join("");

          document.getElementById("rankBody").innerHTML = ranks.map(b => `
            <tr>
              <td>${{b.rank}}</td>
              <td>${{esc(b.name)}}</td>
              <td class="muted">${{esc(b.strategy)}}</td>
              <td>${{Math.round(b.accuracy_pct)}}%</td>
              <td>${{b.operations}}</td>
              <td>${{b.risk_level}}/10</td>
            </tr>`).join("");
        }} catch (e) {{
          const st = document.getElementById("statusText");
          st.textContent = "disconnected";
          st.className = "muted bad";
        }}
      }}

      document.getElementById("refreshBtn").addEventListener("click", async () => {{
        await fetch("/api/refresh", {{ method: "POST" }}).catch(() => {{}});
        refresh();
      }});
      refresh();
      setInterval(refresh, 2000);
    </script>
  </body>
</html>"#,
        host = host,
        port = port,
        mode = mode
    )
}

async fn api_summary(State(st): State<DashboardState>) -> impl IntoResponse {
    let conn = st.radar.conn_state();
    Json(serde_json::json!({
        "ts": now_ts(),
        "mode": st.settings.run_mode,
        "connected": conn.connected,
        "error": conn.error,
        "last_update_ts": conn.last_update_ts,
        "counts": st.radar.counts(),
    }))
}

async fn api_radar(State(st): State<DashboardState>) -> impl IntoResponse {
    let conn = st.radar.conn_state();
    let mut bots = st.radar.all();
    bots.sort_by(|a, b| a.bot_name.cmp(&b.bot_name));
    Json(serde_json::json!({
        "ts": now_ts(),
        "connected": conn.connected,
        "error": conn.error,
        "last_update_ts": conn.last_update_ts,
        "counts": st.radar.counts(),
        "bots": bots,
    }))
}

async fn api_rankings(State(st): State<DashboardState>) -> impl IntoResponse {
    Json(st.ranking.rankings())
}

async fn api_health(State(st): State<DashboardState>) -> impl IntoResponse {
    let conn = st.radar.conn_state();
    Json(serde_json::json!({ "ts": now_ts(), "radar": conn }))
}

/// Manual retry path: failures stay on the connection state (readable via
/// /api/health), so this always answers 200 with the post-refresh state.
async fn api_refresh(State(st): State<DashboardState>) -> impl IntoResponse {
    st.radar.refresh();
    let conn = st.radar.conn_state();
    Json(serde_json::json!({ "ok": conn.connected, "ts": now_ts(), "radar": conn }))
}
