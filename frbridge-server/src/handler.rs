//! Host command handler.

use crate::error::ServerError;
use crate::metrics::Metrics;
use frbridge_core::InjectorHandle;
use frbridge_protocol::HostCommand;
use std::net::SocketAddr;
use std::sync::Arc;

/// Applies host commands to the injector.
pub struct CommandHandler {
    injector: InjectorHandle,
    metrics: Option<Arc<Metrics>>,
}

impl CommandHandler {
    pub fn new(injector: InjectorHandle) -> Self {
        Self {
            injector,
            metrics: None,
        }
    }

    /// Sets the metrics instance for recording command metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn injector(&self) -> &InjectorHandle {
        &self.injector
    }

    /// Applies one command. The host receives no reply; rejections are
    /// logged and counted.
    pub fn handle(&self, addr: SocketAddr, command: &HostCommand) -> Result<(), ServerError> {
        let result = match command {
            HostCommand::SubmitOverride { id, base, data } => {
                tracing::debug!(
                    "[{}] Override for {:#x} base {}: {}",
                    addr,
                    id,
                    base,
                    hex::encode(data)
                );
                self.injector.submit_override(*id, *base, data)
            }
            HostCommand::SetInjection { enabled } => {
                tracing::info!(
                    "[{}] Injection {} by host",
                    addr,
                    if *enabled { "enabled" } else { "disabled" }
                );
                self.injector.set_injection_enabled(*enabled);
                Ok(())
            }
            // the connection takes the export lease itself
            HostCommand::StartExport => {
                tracing::debug!("[{}] Export stream requested", addr);
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                if let Some(ref metrics) = self.metrics {
                    metrics
                        .commands_total
                        .with_label_values(&[command.name()])
                        .inc();
                }
                Ok(())
            }
            Err(e) => {
                let err = ServerError::Core(e);
                self.record_error(&err);
                tracing::warn!("[{}] Rejected {}: {}", addr, command.name(), err);
                Err(err)
            }
        }
    }

    /// Counts a malformed command stream.
    pub fn record_error(&self, err: &ServerError) {
        if let Some(ref metrics) = self.metrics {
            metrics
                .command_errors_total
                .with_label_values(&[err.error_code()])
                .inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frbridge_core::{RuleSet, TriggerEngine};
    use frbridge_core::{CacheRule, TriggerRule};
    use frbridge_protocol::{override_slice, Direction};

    fn handler() -> CommandHandler {
        let rules = RuleSet {
            cache_rules: vec![CacheRule {
                watch_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
            }],
            trigger_rules: vec![TriggerRule {
                trigger_id: 0x40,
                target_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
                e2e_offset: 9,
                e2e_len: 7,
                e2e_init: 0xDC,
                replace_offset: 12,
                replace_len: 2,
                direction: Direction::ToEcu,
            }],
        };
        let (_engine, injector) = TriggerEngine::new(rules, 4, false).unwrap();
        CommandHandler::new(injector).with_metrics(Arc::new(Metrics::new().unwrap()))
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_submit_override() {
        let handler = handler();
        let command = HostCommand::SubmitOverride {
            id: 0x44,
            base: 0,
            data: override_slice(0x44, 0, &[0x12, 0x34]),
        };
        handler.handle(addr(), &command).unwrap();
        assert_eq!(handler.injector().pending_overrides(), 1);
    }

    #[test]
    fn test_rejected_override_is_counted() {
        let handler = handler();
        let command = HostCommand::SubmitOverride {
            id: 0x44,
            base: 0,
            data: override_slice(0x44, 0, &[0x12, 0x34, 0x56]),
        };
        let err = handler.handle(addr(), &command).unwrap_err();
        assert_eq!(err.error_code(), "NO_MATCHING_TRIGGER");
        assert_eq!(handler.injector().override_stats().rejected, 1);

        let metrics = handler.metrics.as_ref().unwrap();
        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains(r#"frbridge_command_errors_total{code="NO_MATCHING_TRIGGER"} 1"#));
    }

    #[test]
    fn test_toggle_injection() {
        let handler = handler();
        handler
            .handle(addr(), &HostCommand::SetInjection { enabled: true })
            .unwrap();
        assert!(handler.injector().injection_enabled());
        handler
            .handle(addr(), &HostCommand::SetInjection { enabled: false })
            .unwrap();
        assert!(!handler.injector().injection_enabled());
    }
}
