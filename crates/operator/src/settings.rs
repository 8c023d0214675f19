use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use clap::Args;

use crate::writers::WriterConfig;

/// Runtime settings, each overridable from the environment.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Namespace holding the operator config map
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Name of the config map describing this site
    #[arg(long, env = "CONFIGMAP_NAME", default_value = "vitistack-config")]
    pub config_map_name: String,

    /// Name of the Vitistack object kept in sync
    #[arg(long, env = "VITISTACK_NAME", default_value = "vitistack")]
    pub vitistack_name: String,

    /// Bind the HTTP API to localhost only
    #[arg(long, env = "DEVELOPMENT")]
    pub development: bool,

    #[arg(long, env = "HTTP_PORT", default_value_t = 9991)]
    pub http_port: u16,

    /// Seconds each watch may take to complete its initial listing
    #[arg(long, env = "SYNC_TIMEOUT_SECS", default_value_t = 120)]
    pub sync_timeout_secs: u64,
}

impl Settings {
    pub fn http_address(&self) -> IpAddr {
        if self.development {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            aggregate_name: self.vitistack_name.clone(),
            namespace: self.namespace.clone(),
            config_map_name: self.config_map_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "vitistack-operator",
            "--namespace",
            "vitistack-system",
            "--config-map-name",
            "site",
            "--vitistack-name",
            "oslo",
            "--development",
            "--http-port",
            "8080",
            "--sync-timeout-secs",
            "30",
        ]);
        let settings = cli.settings;

        assert_eq!(settings.http_address(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(settings.http_port, 8080);
        assert_eq!(settings.sync_timeout(), Duration::from_secs(30));

        let writers = settings.writer_config();
        assert_eq!(writers.aggregate_name, "oslo");
        assert_eq!(writers.namespace, "vitistack-system");
        assert_eq!(writers.config_map_name, "site");
    }

    #[test]
    fn rejects_invalid_port() {
        let parsed = Cli::try_parse_from(["vitistack-operator", "--http-port", "99999"]);
        assert!(parsed.is_err());
    }
}
