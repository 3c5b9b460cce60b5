//! Consumes `email_requests` and closes the loop: either simulates delivery
//! (for local/dev use) or sends real mail over SMTP via `lettre`. Exposes
//! resettable `sent`/`failed` counters for the admin `/stats` endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::PoolConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{EMAIL_REQUESTS_TOPIC, EventBus};
use crate::config::NotifierConfig;
use crate::error::NotifierError;
use crate::model::EmailRequest;

const SIMULATED_FAILURE_RATE: f64 = 0.01;
const SIMULATED_DELAY_MIN_MS: u64 = 10;
const SIMULATED_DELAY_MAX_MS: u64 = 50;

#[derive(Default)]
pub struct NotifierStats {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl NotifierStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

enum Delivery {
    Simulation,
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
}

pub struct Notifier {
    delivery: Delivery,
    from_address: String,
    stats: Arc<NotifierStats>,
}

impl Notifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotifierError> {
        let delivery = match config.mode.as_str() {
            "smtp" => Delivery::Smtp(build_transport(config)?),
            _ => Delivery::Simulation,
        };
        Ok(Self {
            delivery,
            from_address: config.from_address.clone(),
            stats: Arc::new(NotifierStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<NotifierStats> {
        self.stats.clone()
    }

    async fn handle(&self, request: EmailRequest) {
        match &self.delivery {
            Delivery::Simulation => self.simulate(&request).await,
            Delivery::Smtp(transport) => self.send_smtp(transport, &request).await,
        }
    }

    async fn simulate(&self, request: &EmailRequest) {
        let delay_ms = rand::rng().random_range(SIMULATED_DELAY_MIN_MS..=SIMULATED_DELAY_MAX_MS);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        if rand::rng().random_bool(SIMULATED_FAILURE_RATE) {
            warn!(to = %request.to_email, code_id = %request.code_id, "simulated delivery failure");
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        info!(
            to = %request.to_email,
            code_id = %request.code_id,
            alarm_time = %request.alarm_time,
            timezone = %request.timezone,
            "simulated email delivery"
        );
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
    }

    async fn send_smtp(&self, transport: &AsyncSmtpTransport<Tokio1Executor>, request: &EmailRequest) {
        let message = match build_message(&self.from_address, request) {
            Ok(m) => m,
            Err(e) => {
                error!(to = %request.to_email, error = %e, "failed to build email message");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // On failure the transport's pooled connection for this send is
        // dropped rather than returned — no automatic retry.
        match transport.send(message).await {
            Ok(_) => {
                info!(to = %request.to_email, code_id = %request.code_id, "email sent via SMTP");
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(to = %request.to_email, code_id = %request.code_id, error = %e, "SMTP send failed");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn build_transport(config: &NotifierConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifierError> {
    let builder = if config.smtp_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NotifierError::Transport(e.to_string()))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
    };

    let builder = builder
        .port(config.smtp_port)
        .pool_config(PoolConfig::new().max_size(config.smtp_pool_size as u32));

    let builder = match (&config.smtp_username, &config.smtp_password) {
        (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
        _ => builder,
    };

    Ok(builder.build())
}

fn build_message(from: &str, request: &EmailRequest) -> Result<Message, NotifierError> {
    let from_mailbox: Mailbox = from
        .parse()
        .map_err(|e| NotifierError::Send(format!("invalid from address '{from}': {e}")))?;
    let to_mailbox: Mailbox = request
        .to_email
        .parse()
        .map_err(|e| NotifierError::Send(format!("invalid recipient '{}': {e}", request.to_email)))?;

    Message::builder()
        .from(from_mailbox)
        .to(to_mailbox)
        .subject(format!("Alarm {}", request.code_id))
        .body(format!(
            "{}\n\nScheduled for {} ({}).",
            request.description, request.alarm_time, request.timezone
        ))
        .map_err(|e| NotifierError::Send(e.to_string()))
}

/// Subscriber task: consumes `email_requests` until `cancel` fires.
pub async fn run(bus: EventBus, notifier: Arc<Notifier>, cancel: CancellationToken) {
    info!("notifier started");
    bus.subscribe(EMAIL_REQUESTS_TOPIC, cancel, move |request: EmailRequest| {
        let notifier = notifier.clone();
        async move { notifier.handle(request).await }
    })
    .await;
    info!("notifier shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EmailRequest {
        EmailRequest {
            to_email: "u@x.com".to_string(),
            code_id: "A".to_string(),
            description: "Take your medication".to_string(),
            alarm_time: "09:00:00".to_string(),
            timezone: "UTC".to_string(),
        }
    }

    #[test]
    fn build_message_succeeds_for_valid_addresses() {
        let message = build_message("alarms@localhost", &request());
        assert!(message.is_ok());
    }

    #[test]
    fn build_message_rejects_invalid_recipient() {
        let mut request = request();
        request.to_email = "not-an-email".to_string();
        let err = build_message("alarms@localhost", &request).unwrap_err();
        assert!(matches!(err, NotifierError::Send(_)));
    }

    #[tokio::test]
    async fn simulation_notifier_counts_a_send() {
        let config = NotifierConfig {
            mode: "simulation".to_string(),
            ..Default::default()
        };
        let notifier = Notifier::new(&config).unwrap();
        // The 1% synthetic failure rate means this is not airtight, but at
        // this sample size a flip is astronomically unlikely.
        for _ in 0..5 {
            notifier.handle(request()).await;
        }
        assert_eq!(notifier.stats().sent() + notifier.stats().failed(), 5);
    }

    #[test]
    fn stats_reset_clears_both_counters() {
        let stats = NotifierStats::default();
        stats.sent.fetch_add(3, Ordering::Relaxed);
        stats.failed.fetch_add(2, Ordering::Relaxed);
        stats.reset();
        assert_eq!(stats.sent(), 0);
        assert_eq!(stats.failed(), 0);
    }
}
