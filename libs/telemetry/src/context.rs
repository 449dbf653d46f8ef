#[derive(Debug, Clone)]
pub struct TelemetryLabels {
    pub channel: String,
    pub workspace: Option<String>,
    pub msg_id: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            workspace: None,
            msg_id: None,
            extra: Vec::new(),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(3 + self.extra.len());
        tags.push(("channel".into(), self.channel.clone()));
        if let Some(workspace) = &self.workspace {
            tags.push(("workspace".into(), workspace.clone()));
        }
        if let Some(msg) = &self.msg_id {
            tags.push(("msg_id".into(), msg.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}

#[derive(Debug, Clone)]
pub struct MessageContext {
    pub labels: TelemetryLabels,
}

impl MessageContext {
    pub fn new(labels: TelemetryLabels) -> Self {
        Self { labels }
    }

    /// Span wrapping one envelope's trip through the dispatcher.
    pub fn dispatch_span(&self) -> tracing::Span {
        let span = tracing::info_span!(
            "ingress.dispatch",
            channel = tracing::field::Empty,
            workspace = tracing::field::Empty,
            msg_id = tracing::field::Empty,
        );
        crate::metrics::with_common_fields(
            &span,
            &self.labels.channel,
            self.labels.workspace.as_deref(),
            self.labels.msg_id.as_deref(),
        );
        span
    }
}
