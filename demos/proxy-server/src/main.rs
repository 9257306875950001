//! Proxy control server with a browser front end.
//!
//! Run with: cargo run -p proxy-server [config.json]
//!
//! Then open http://localhost:3000 in your browser.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use serde::Deserialize;
use sshproxy_core::SettingsStore;
use sshproxy_engine::{EngineConfig, ProcessEngine};
use sshproxy_session::{Supervisor, SupervisorConfig, storage::FileStore};
use sshproxy_transport::websocket::{WsState, create_ws_router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration file. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerConfig {
    supervisor: SupervisorConfig,
    engine: EngineConfig,
    /// Settings file; defaults to the per-user config directory.
    settings_path: Option<PathBuf>,
}

impl ServerConfig {
    fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::load(std::env::args_os().nth(1).map(PathBuf::from))?;
    let settings: Arc<dyn SettingsStore> = Arc::new(
        config
            .settings_path
            .map_or_else(FileStore::default_location, FileStore::new),
    );

    let engine = Arc::new(ProcessEngine::new(config.engine));
    let supervisor = Arc::new(
        Supervisor::builder(engine)
            .config(config.supervisor)
            .spawn(),
    );

    match supervisor.resume(settings.as_ref()).await {
        Ok(true) => tracing::info!("Restarting proxy from saved settings"),
        Ok(false) => {}
        Err(e) => tracing::warn!("Failed to load saved settings: {e}"),
    }

    let state = WsState::new(Arc::clone(&supervisor)).with_settings(settings);
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(state))
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = std::env::var("PROXY_SERVER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()
        .context("Invalid PROXY_SERVER_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    supervisor.shutdown().await;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>SSH Proxy</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        form { display: grid; grid-template-columns: 120px 320px; gap: 6px; margin-bottom: 12px; }
        textarea { height: 80px; }
        #log {
            background: #111;
            padding: 10px;
            height: calc(100vh - 420px);
            overflow-y: auto;
            font-family: Menlo, Monaco, "Courier New", monospace;
            font-size: 13px;
            white-space: pre-wrap;
        }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .running { color: #4a4; }
        .stopped, .error { color: #a44; }
        .engine { color: #8ab; }
    </style>
</head>
<body>
    <h1>SSH Proxy</h1>
    <div class="status" id="status">Connecting...</div>
    <form id="form">
        <label>Host</label><input name="host" required />
        <label>Port</label><input name="port" value="22" />
        <label>User</label><input name="user" required />
        <label>Password</label><input name="password" type="password" />
        <label>Private key</label><textarea name="credential"></textarea>
        <label>Proxy</label>
        <select name="proxy_kind">
            <option value="socks5">SOCKS5</option>
            <option value="http">HTTP</option>
        </select>
        <label>Local port</label><input name="local_port" value="1081" />
        <span></span>
        <span>
            <button type="submit">Start</button>
            <button type="button" id="stop">Stop</button>
        </span>
    </form>
    <div id="log"></div>

    <script>
        const status = document.getElementById('status');
        const log = document.getElementById('log');
        const form = document.getElementById('form');
        let ws;

        function setPhase(phase) {
            status.textContent = `Proxy ${phase}`;
            status.className = `status ${phase}`;
        }

        function append(entry) {
            const line = document.createElement('div');
            const time = new Date(entry.timestamp).toLocaleTimeString();
            line.textContent = `[${time}] ${entry.message}`;
            line.className = entry.source;
            log.appendChild(line);
            log.scrollTop = log.scrollHeight;
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status stopped';
                log.textContent = '';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                const msg = JSON.parse(event.data);
                if (msg.type === 'status') {
                    setPhase(msg.snapshot.phase);
                } else if (msg.type === 'event') {
                    const inner = msg.event;
                    if (inner.type === 'log') append(inner);
                    else if (inner.type === 'phase') setPhase(inner.phase);
                } else if (msg.type === 'error') {
                    append({ timestamp: Date.now(), source: 'system', message: msg.message });
                }
            };
        }

        form.addEventListener('submit', (e) => {
            e.preventDefault();
            const data = new FormData(form);
            const config = Object.fromEntries(data.entries());
            config.local_port = parseInt(config.local_port, 10);
            ws.send(JSON.stringify({ type: 'start', config }));
        });

        document.getElementById('stop').addEventListener('click', () => {
            ws.send(JSON.stringify({ type: 'stop' }));
        });

        connect();
    </script>
</body>
</html>
"#;
