use anyhow::Result;
use notification_pipeline::{
    clients::{
        circuit_breaker::CircuitBreaker,
        redis::idempotency_key,
        sender::ProtectedSender,
        status::HttpStatusReporter,
    },
    consumer::{ChannelConsumer, Disposition},
    models::{
        circuit_breaker::CircuitBreakerConfig,
        message::{Channel, InboundMessage},
        retry::RetryConfig,
        status::NotificationStatus,
    },
};
use std::sync::{Arc, atomic::Ordering};

use crate::support::{
    ConsumerFixture, MemoryBroker, PUSH_TOKEN, SendOutcome, inbound, queue_message, template,
    test_config, user,
};

/// Test: A successful delivery is acked once and never dead-lettered
#[tokio::test]
async fn test_success_acks_once() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Succeed);
    let consumer = fixture.consumer(Channel::Email);

    let mut broker = MemoryBroker::default();
    broker.publish(inbound(&queue_message("req-ok"), 0));
    broker.drain(&consumer).await;

    assert_eq!(broker.settled, vec![Disposition::Ack]);
    assert!(broker.dead_letters.is_empty());
    assert_eq!(fixture.reporter.statuses(), vec![NotificationStatus::Delivered]);

    let sent = fixture.sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "ada@example.com");
    assert_eq!(sent[0].subject, "Welcome Ada");
    assert_eq!(sent[0].body, "Hello Ada, thanks for joining");

    Ok(())
}

/// Test: A push delivery goes to the user's device token
#[tokio::test]
async fn test_push_uses_device_token() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Push, SendOutcome::Succeed);
    let consumer = fixture.consumer(Channel::Push);

    let disposition = consumer.handle(&inbound(&queue_message("req-push"), 0)).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(fixture.sender.sent.lock().unwrap()[0].recipient, PUSH_TOKEN);

    Ok(())
}

/// Test: Repeated transient failures requeue 0→3 and dead-letter exactly once
#[tokio::test]
async fn test_transient_failures_reach_dlq_once() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Transient);
    let consumer = fixture.consumer(Channel::Email);

    let message = queue_message("req-flaky");
    let body = serde_json::to_vec(&message)?;

    let mut broker = MemoryBroker::default();
    broker.publish(inbound(&message, 0));
    broker.drain(&consumer).await;

    assert_eq!(
        broker.settled,
        vec![
            Disposition::Requeue { retry_count: 1 },
            Disposition::Requeue { retry_count: 2 },
            Disposition::Requeue { retry_count: 3 },
            Disposition::DeadLetter {
                reason: "transient failure in provider: status 503".to_string()
            },
        ]
    );
    assert_eq!(broker.dead_letters, vec![body], "Original body dead-lettered once");
    assert!(broker.queue.is_empty(), "Nothing left in the primary queue");
    assert_eq!(fixture.sender.attempts.load(Ordering::SeqCst), 4);

    Ok(())
}

/// Test: A permanent provider rejection is acked without retry or DLQ
#[tokio::test]
async fn test_permanent_failure_acks_without_retry() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Rejected);
    let consumer = fixture.consumer(Channel::Email);

    let mut broker = MemoryBroker::default();
    broker.publish(inbound(&queue_message("req-bad"), 0));
    broker.drain(&consumer).await;

    assert_eq!(broker.settled, vec![Disposition::Ack]);
    assert!(broker.dead_letters.is_empty());
    assert_eq!(fixture.sender.attempts.load(Ordering::SeqCst), 1);

    let reports = fixture.reporter.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1, NotificationStatus::Failed);
    assert!(reports[0].2.as_deref().unwrap_or_default().contains("invalid registration token"));

    Ok(())
}

/// Test: Unknown users, missing templates and channel mismatches fail permanently
#[tokio::test]
async fn test_validation_failures_are_terminal() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Succeed);
    let consumer = fixture.consumer(Channel::Email);

    let mut unknown_user = queue_message("req-unknown-user");
    unknown_user.user_id = "nobody".to_string();

    let mut unknown_template = queue_message("req-unknown-template");
    unknown_template.template_code = "MISSING".to_string();

    let mut missing_variable = queue_message("req-missing-var");
    missing_variable.variables.clear();

    for message in [unknown_user, unknown_template, missing_variable] {
        assert_eq!(consumer.handle(&inbound(&message, 0)).await, Disposition::Ack);
    }

    let push_fixture = ConsumerFixture::new(Channel::Push, SendOutcome::Succeed);
    let mismatched = ChannelConsumer::new(
        Channel::Push,
        push_fixture.users.clone(),
        Arc::new(crate::support::FakeTemplates::with(template("WELCOME", Channel::Email))),
        push_fixture.sender.clone(),
        push_fixture.reporter.clone(),
        push_fixture.dedupe.clone(),
        3,
    );
    assert_eq!(
        mismatched.handle(&inbound(&queue_message("req-mismatch"), 0)).await,
        Disposition::Ack
    );

    assert_eq!(fixture.sender.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(push_fixture.sender.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(
        fixture.reporter.statuses(),
        vec![NotificationStatus::Failed; 3]
    );

    Ok(())
}

/// Test: Disabled channels and bad recipients are not delivered
#[tokio::test]
async fn test_recipient_checks() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Succeed);

    let mut opted_out = user("ada@example.com");
    opted_out.email_enabled = false;
    let mut bad_address = user("not-an-address");
    bad_address.email_enabled = true;

    let consumer = ChannelConsumer::new(
        Channel::Email,
        Arc::new(crate::support::FakeUsers::with("user-1", opted_out)),
        fixture.templates.clone(),
        fixture.sender.clone(),
        fixture.reporter.clone(),
        fixture.dedupe.clone(),
        3,
    );
    assert_eq!(consumer.handle(&inbound(&queue_message("req-optout"), 0)).await, Disposition::Ack);

    let consumer = ChannelConsumer::new(
        Channel::Email,
        Arc::new(crate::support::FakeUsers::with("user-1", bad_address)),
        fixture.templates.clone(),
        fixture.sender.clone(),
        fixture.reporter.clone(),
        fixture.dedupe.clone(),
        3,
    );
    assert_eq!(consumer.handle(&inbound(&queue_message("req-bad-addr"), 0)).await, Disposition::Ack);

    assert_eq!(fixture.sender.attempts.load(Ordering::SeqCst), 0);

    Ok(())
}

/// Test: A body that is not a queue message is acked and dropped
#[tokio::test]
async fn test_malformed_body_is_acked() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Succeed);
    let consumer = fixture.consumer(Channel::Email);

    let disposition = consumer.handle(&InboundMessage::new(b"{not json".to_vec(), 0)).await;

    assert_eq!(disposition, Disposition::Ack);
    assert!(fixture.reporter.reports.lock().unwrap().is_empty());

    Ok(())
}

/// Test: A user service outage is redelivered rather than dropped
#[tokio::test]
async fn test_dependency_outage_requeues() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Succeed);
    fixture.users.unavailable.store(true, Ordering::SeqCst);
    let consumer = fixture.consumer(Channel::Email);

    let disposition = consumer.handle(&inbound(&queue_message("req-outage"), 1)).await;

    assert_eq!(disposition, Disposition::Requeue { retry_count: 2 });

    Ok(())
}

/// Test: A redelivered message that was already sent is not sent twice
#[tokio::test]
async fn test_duplicate_delivery_is_skipped() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Succeed);
    let consumer = fixture.consumer(Channel::Email);
    let message = inbound(&queue_message("req-dup"), 0);

    assert_eq!(consumer.handle(&message).await, Disposition::Ack);
    assert!(fixture.dedupe.contains(&idempotency_key("email_service", "req-dup")));

    assert_eq!(consumer.handle(&message).await, Disposition::Ack);
    assert_eq!(fixture.sender.attempts.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: An unreachable status endpoint does not block acknowledgment
#[tokio::test]
async fn test_status_reporter_outage_still_acks() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Succeed);
    let config = test_config(&[
        ("STATUS_SERVICE_URL", "http://127.0.0.1:9"),
        ("HTTP_TIMEOUT_SECONDS", "1"),
    ]);
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()?;
    let reporter = Arc::new(HttpStatusReporter::new(&config, http_client));
    let consumer = fixture.consumer_with_reporter(Channel::Email, reporter);

    let disposition = consumer.handle(&inbound(&queue_message("req-no-status"), 0)).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(fixture.sender.sent.lock().unwrap().len(), 1);

    Ok(())
}

/// Test: An open provider breaker stops calls and still leads to redelivery
#[tokio::test(start_paused = true)]
async fn test_open_breaker_requeues_without_calling_provider() -> Result<()> {
    let fixture = ConsumerFixture::new(Channel::Email, SendOutcome::Transient);
    let breaker = Arc::new(CircuitBreaker::new(
        CircuitBreakerConfig::new("sendgrid").with_failure_threshold(2),
    ));
    let retry = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
        jitter: 0.0,
    };
    let protected = Arc::new(ProtectedSender::new(fixture.sender.clone(), breaker, retry));

    let consumer = ChannelConsumer::new(
        Channel::Email,
        fixture.users.clone(),
        fixture.templates.clone(),
        protected,
        fixture.reporter.clone(),
        fixture.dedupe.clone(),
        3,
    );

    let first = consumer.handle(&inbound(&queue_message("req-cb-1"), 0)).await;
    assert_eq!(first, Disposition::Requeue { retry_count: 1 });
    assert_eq!(
        fixture.sender.attempts.load(Ordering::SeqCst),
        2,
        "Breaker opened after the second attempt"
    );

    let second = consumer.handle(&inbound(&queue_message("req-cb-2"), 3)).await;
    assert!(matches!(second, Disposition::DeadLetter { ref reason } if reason.contains("circuit breaker is open")));
    assert_eq!(fixture.sender.attempts.load(Ordering::SeqCst), 2);

    Ok(())
}
