//! Configuration loading and logger setup.
//!
//! Two TOML files feed a node, both optional:
//!
//! - the **app config** (`[log]`, `[topology]`) with process-wide
//!   settings, falling back to defaults when the file is absent;
//! - the **cluster config** (`[[nodes]]`, `[[edges]]`) describing a
//!   whole deployment, from which one node's entry plus its incident
//!   edges are picked by name.
//!
//! A [`RuntimeConfig`] is the merge of file values and command-line
//! values; the daemon and the public API only ever consume the merged
//! form.

use {
    crate::error::{CoreError, Result},
    log::LevelFilter,
    serde::Deserialize,
    std::{fs, io::Write as _, path::Path},
};

/// Default periodic topology-sync interval in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

// ── App config ──────────────────────────────────────────────────────────────

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `"file"` or `"stdout"`.
    pub output: String,
    /// Directory for per-node log files (`<log_dir>/<node_id>.log`).
    pub log_dir: String,
    /// Log level filter (`error`..`trace`).
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: "file".to_string(),
            log_dir: "log".to_string(),
            level: "info".to_string(),
        }
    }
}

/// `[topology]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Full topology-sync interval in seconds.
    pub sync_interval: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

/// Process-wide application settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub topology: TopologyConfig,
}

impl AppConfig {
    /// Load from `path`, or return defaults when the file is missing.
    ///
    /// A present-but-broken file is still an error; only absence is
    /// forgiven.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| CoreError::ConfigIo {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| CoreError::ConfigParse {
            path: path.to_string(),
            source,
        })
    }
}

// ── Cluster config ──────────────────────────────────────────────────────────

/// One `[[nodes]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub id: String,
    pub ip: String,
    /// Data-plane RPC port.
    pub data_port: u16,
    /// Gossip membership port.
    pub gossip_port: u16,
    /// Gossip address of a seed to join, empty for the first node.
    #[serde(default)]
    pub join: String,
}

/// One `[[edges]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeEntry {
    pub from: String,
    pub to: String,
    pub cost: f64,
}

/// A whole-deployment description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeEntry>,
    pub edges: Vec<EdgeEntry>,
}

impl ClusterConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| CoreError::ConfigIo {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| CoreError::ConfigParse {
            path: path.to_string(),
            source,
        })
    }

    /// Find one node's entry by id.
    pub fn node(&self, id: &str) -> Option<&NodeEntry> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Every configured edge touching `id` (the graph is undirected, so
    /// both endpoints count).
    pub fn edges_for(&self, id: &str) -> Vec<EdgeEntry> {
        self.edges
            .iter()
            .filter(|e| e.from == id || e.to == id)
            .cloned()
            .collect()
    }
}

// ── Runtime config ──────────────────────────────────────────────────────────

/// The merged configuration one node actually runs with.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub node_id: String,
    pub node_ip: String,
    /// Data-plane RPC port.
    pub data_port: u16,
    /// Gossip membership port.
    pub gossip_port: u16,
    /// Seed gossip address to join, if any.
    pub join_addr: Option<String>,
    /// Edges seeded into the topology at startup.
    pub edges: Vec<EdgeEntry>,
    pub app: AppConfig,
}

impl RuntimeConfig {
    /// Build from the cluster file: pick `node_name`'s entry and its
    /// incident edges.
    pub fn from_cluster_file(app_path: &str, cluster_path: &str, node_name: &str) -> Result<Self> {
        let app = AppConfig::load_or_default(app_path)?;
        let cluster = ClusterConfig::load(cluster_path)?;
        let entry = cluster.node(node_name).ok_or_else(|| {
            CoreError::Config(format!("node {node_name} not found in {cluster_path}"))
        })?;
        Ok(Self {
            node_id: entry.id.clone(),
            node_ip: entry.ip.clone(),
            data_port: entry.data_port,
            gossip_port: entry.gossip_port,
            join_addr: (!entry.join.is_empty()).then(|| entry.join.clone()),
            edges: cluster.edges_for(&entry.id),
            app,
        })
    }

    /// Build from command-line values.  An empty id defaults to
    /// `node-<data_port>`.
    pub fn from_flags(
        app: AppConfig,
        node_id: &str,
        node_ip: &str,
        data_port: u16,
        gossip_port: u16,
        join_addr: Option<String>,
    ) -> Self {
        let node_id = if node_id.is_empty() {
            format!("node-{data_port}")
        } else {
            node_id.to_string()
        };
        Self {
            node_id,
            node_ip: node_ip.to_string(),
            data_port,
            gossip_port,
            join_addr,
            edges: Vec::new(),
            app,
        }
    }

    /// Reject configurations the node cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(CoreError::Config("node id must not be empty".into()));
        }
        if self.node_ip.is_empty() {
            return Err(CoreError::Config("node ip must not be empty".into()));
        }
        if self.node_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(CoreError::Config(format!(
                "invalid node ip: {}",
                self.node_ip
            )));
        }
        if self.data_port != 0 && self.data_port == self.gossip_port {
            return Err(CoreError::Config(format!(
                "data and gossip ports collide on {}",
                self.data_port
            )));
        }
        Ok(())
    }

    /// Bind address of the data-plane listener.
    pub fn rpc_bind_addr(&self) -> String {
        format!("{}:{}", self.node_ip, self.data_port)
    }

    /// Bind address of the gossip socket.
    pub fn gossip_bind_addr(&self) -> String {
        format!("{}:{}", self.node_ip, self.gossip_port)
    }

    /// Route log output according to the `[log]` section.
    ///
    /// `RUST_LOG` still wins when set, so operators can crank verbosity
    /// without touching files.
    pub fn setup_logger(&self) -> Result<()> {
        let level = self
            .app
            .log
            .level
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::Info);
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level);
        builder.parse_default_env();

        if self.app.log.output != "stdout" {
            let dir = &self.app.log.log_dir;
            fs::create_dir_all(dir).map_err(|source| CoreError::ConfigIo {
                path: dir.clone(),
                source,
            })?;
            let path = format!("{dir}/{}.log", self.node_id);
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| CoreError::ConfigIo { path: path.clone(), source })?;
            builder.target(env_logger::Target::Pipe(Box::new(LineWriter(file))));
            eprintln!("[{}] logging to {path}", self.node_id);
        }

        // Ignore double-init: tests and embedding applications may have
        // installed a logger already.
        let _ = builder.try_init();
        Ok(())
    }
}

/// Flushes after every write so `tail -f` on a node log stays live.
struct LineWriter(fs::File);

impl std::io::Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.0.write(buf)?;
        self.0.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
