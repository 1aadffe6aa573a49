//! Command builder for the development node.

/// Builder for node command-line arguments.
#[derive(Debug, Clone)]
pub struct NodeCmdBuilder {
    host: String,
    port: u16,
    chain_id: Option<u64>,
    block_time: Option<u64>,
    extra_args: Vec<String>,
}

impl NodeCmdBuilder {
    /// Create a new node command builder.
    pub fn new() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8545,
            chain_id: None,
            block_time: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the chain id. The node picks its own default when unset.
    pub fn chain_id(mut self, chain_id: Option<u64>) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Set the block time in seconds. The node mines on demand when unset.
    pub fn block_time(mut self, block_time: Option<u64>) -> Self {
        self.block_time = block_time;
        self
    }

    /// Add extra arguments.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "--host".to_string(),
            self.host,
            "--port".to_string(),
            self.port.to_string(),
        ];

        if let Some(chain_id) = self.chain_id {
            cmd.push("--chain-id".to_string());
            cmd.push(chain_id.to_string());
        }

        if let Some(block_time) = self.block_time {
            cmd.push("--block-time".to_string());
            cmd.push(block_time.to_string());
        }

        cmd.extend(self.extra_args);

        cmd
    }
}

impl Default for NodeCmdBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_cmd_builder_defaults() {
        let cmd = NodeCmdBuilder::new().build();
        assert_eq!(cmd, vec!["--host", "0.0.0.0", "--port", "8545"]);
    }

    #[test]
    fn test_node_cmd_builder_optional_flags() {
        let cmd = NodeCmdBuilder::new()
            .host("127.0.0.1")
            .port(9545)
            .chain_id(Some(31337))
            .block_time(None)
            .extra_args(["--silent"])
            .build();

        assert!(cmd.contains(&"--chain-id".to_string()));
        assert!(cmd.contains(&"31337".to_string()));
        assert!(!cmd.contains(&"--block-time".to_string()));
        assert_eq!(cmd.last().map(String::as_str), Some("--silent"));
    }
}
