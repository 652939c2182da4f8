use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// In-process store, for local runs.
    Memory,
    Etcd,
}

#[derive(Debug, Parser)]
#[command(name = "meridian-descheduler", about = "Moves replicas off clusters that cannot run them")]
pub struct Args {
    #[arg(long, value_enum, default_value_t = StoreKind::Etcd)]
    pub store: StoreKind,

    #[arg(long, env = "ETCD_ENDPOINT", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoint: String,

    /// Seconds between full resync sweeps over all bindings.
    #[arg(long, default_value_t = 60)]
    pub interval_secs: u64,

    /// Bind address for /metrics and /healthz.
    #[arg(long, default_value = "0.0.0.0:10830")]
    pub metrics_addr: String,

    /// OTLP/HTTP base URL for span export (e.g. "http://10.0.0.5:4318").
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP endpoint.
    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
