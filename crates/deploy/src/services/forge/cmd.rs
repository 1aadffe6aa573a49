//! Command builder for `forge script`.

/// Builder for `forge script` command-line arguments.
#[derive(Debug, Clone)]
pub struct ForgeScriptCmdBuilder {
    script: String,
    rpc_url: Option<String>,
    private_key: Option<String>,
    extra_args: Vec<String>,
}

impl ForgeScriptCmdBuilder {
    /// Create a builder for the given script identifier (`path:Contract`).
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            rpc_url: None,
            private_key: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the RPC endpoint the script runs against.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    /// Set the signing key.
    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Add extra arguments.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec!["script".to_string(), self.script];

        if let Some(url) = self.rpc_url {
            cmd.push("--rpc-url".to_string());
            cmd.push(url);
        }

        cmd.push("--broadcast".to_string());

        if let Some(key) = self.private_key {
            cmd.push("--private-key".to_string());
            cmd.push(key);
        }

        cmd.extend(self.extra_args);

        cmd
    }
}
