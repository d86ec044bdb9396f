use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::shared::infrastructure::audit::{AuditStore, InMemoryAuditStore, PostgresAuditStore};
use crate::shared::infrastructure::auth::JwtService;
use crate::shared::infrastructure::config::{AppConfig, Environment};
use crate::shared::infrastructure::metrics::Metrics;
use crate::shared::infrastructure::rate_limit::RateLimiter;

use crate::bounded_contexts::payment::application::services::PaymentService;
use crate::bounded_contexts::payment::domain::value_objects::FeePercent;
use crate::bounded_contexts::payment::infrastructure::gateway::{
    MockPaymentGateway, PaymentGateway, StripeGateway,
};
use crate::bounded_contexts::payment::infrastructure::repositories::in_memory::{
    InMemoryIdempotencyKeyRepository, InMemoryPaymentRepository, InMemoryWebhookEventRepository,
};
use crate::bounded_contexts::payment::infrastructure::repositories::postgres::{
    PostgresIdempotencyKeyRepository, PostgresPaymentRepository, PostgresWebhookEventRepository,
};
use crate::bounded_contexts::scene::application::services::{
    AllianceService, DirtyScenes, TrustService,
};
use crate::bounded_contexts::scene::domain::repository::{
    MembershipRepository, SceneRepository,
};
use crate::bounded_contexts::scene::infrastructure::repositories::in_memory::{
    InMemoryAllianceRepository, InMemoryMembershipRepository, InMemorySceneRepository,
    InMemoryTrustScoreRepository,
};
use crate::bounded_contexts::scene::infrastructure::repositories::postgres::{
    PostgresAllianceRepository, PostgresMembershipRepository, PostgresSceneRepository,
    PostgresTrustScoreRepository,
};
use crate::bounded_contexts::stream::application::broadcaster::EventBroadcaster;
use crate::bounded_contexts::stream::application::services::StreamSessionService;
use crate::bounded_contexts::stream::infrastructure::repositories::in_memory::{
    InMemoryParticipantEventRepository, InMemoryParticipantRepository,
    InMemoryStreamAnalyticsRepository, InMemoryStreamSessionRepository,
};
use crate::bounded_contexts::stream::infrastructure::repositories::postgres::{
    PostgresParticipantEventRepository, PostgresParticipantRepository,
    PostgresStreamAnalyticsRepository, PostgresStreamSessionRepository,
};

/// Shared handles for the HTTP layer. Background workers (trust recompute,
/// indexer, janitor) are owned by main, not by this state.
#[derive(Clone)]
pub struct AppState {
    pub jwt: Arc<JwtService>,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: Arc<dyn AuditStore>,
    pub alliance_service: Arc<AllianceService>,
    pub trust_service: Arc<TrustService>,
    pub stream_service: Arc<StreamSessionService>,
    pub payment_service: Arc<PaymentService>,
}

impl FromRef<AppState> for Arc<JwtService> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// Direct repository handles, exposed so tests can seed state that has no
/// public write endpoint (scenes, memberships).
pub struct TestHandles {
    pub scenes: Arc<dyn SceneRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
}

impl AppState {
    pub fn with_postgres(config: &AppConfig, pool: PgPool) -> Result<Self, crate::shared::domain::errors::AppError> {
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(StripeGateway::new(config.stripe_secret_key.clone())?);
        let audit: Arc<dyn AuditStore> = Arc::new(PostgresAuditStore::new(pool.clone()));

        Ok(Self::wire(
            config,
            audit,
            gateway,
            Arc::new(PostgresSceneRepository::new(pool.clone())),
            Arc::new(PostgresAllianceRepository::new(pool.clone())),
            Arc::new(PostgresMembershipRepository::new(pool.clone())),
            Arc::new(PostgresTrustScoreRepository::new(pool.clone())),
            Arc::new(PostgresStreamSessionRepository::new(pool.clone())),
            Arc::new(PostgresParticipantRepository::new(pool.clone())),
            Arc::new(PostgresParticipantEventRepository::new(pool.clone())),
            Arc::new(PostgresStreamAnalyticsRepository::new(pool.clone())),
            Arc::new(PostgresPaymentRepository::new(pool.clone())),
            Arc::new(PostgresWebhookEventRepository::new(pool.clone())),
            Arc::new(PostgresIdempotencyKeyRepository::new(pool)),
        ))
    }

    /// Fully in-memory wiring with the mock payment gateway.
    pub fn in_memory(config: &AppConfig) -> (Self, TestHandles) {
        let scenes = Arc::new(InMemorySceneRepository::new());
        let memberships = Arc::new(InMemoryMembershipRepository::new());
        let state = Self::wire(
            config,
            Arc::new(InMemoryAuditStore::new()),
            Arc::new(MockPaymentGateway::new()),
            scenes.clone(),
            Arc::new(InMemoryAllianceRepository::new()),
            memberships.clone(),
            Arc::new(InMemoryTrustScoreRepository::new()),
            Arc::new(InMemoryStreamSessionRepository::new()),
            Arc::new(InMemoryParticipantRepository::new()),
            Arc::new(InMemoryParticipantEventRepository::new()),
            Arc::new(InMemoryStreamAnalyticsRepository::new()),
            Arc::new(InMemoryPaymentRepository::new()),
            Arc::new(InMemoryWebhookEventRepository::new()),
            Arc::new(InMemoryIdempotencyKeyRepository::new()),
        );
        (
            state,
            TestHandles {
                scenes,
                memberships,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn wire(
        config: &AppConfig,
        audit: Arc<dyn AuditStore>,
        gateway: Arc<dyn PaymentGateway>,
        scenes: Arc<dyn SceneRepository>,
        alliances: Arc<dyn crate::bounded_contexts::scene::domain::repository::AllianceRepository>,
        memberships: Arc<dyn MembershipRepository>,
        trust_scores: Arc<dyn crate::bounded_contexts::scene::domain::repository::TrustScoreRepository>,
        stream_sessions: Arc<dyn crate::bounded_contexts::stream::domain::repository::StreamSessionRepository>,
        participants: Arc<dyn crate::bounded_contexts::stream::domain::repository::ParticipantRepository>,
        participant_events: Arc<dyn crate::bounded_contexts::stream::domain::repository::ParticipantEventRepository>,
        stream_analytics: Arc<dyn crate::bounded_contexts::stream::domain::repository::StreamAnalyticsRepository>,
        payments: Arc<dyn crate::bounded_contexts::payment::domain::repository::PaymentRepository>,
        webhook_events: Arc<dyn crate::bounded_contexts::payment::domain::repository::WebhookEventRepository>,
        idempotency_keys: Arc<dyn crate::bounded_contexts::payment::domain::repository::IdempotencyKeyRepository>,
    ) -> Self {
        let jwt = Arc::new(JwtService::new(
            &config.jwt_secret,
            config.jwt_previous_secret.as_deref(),
        ));
        let metrics = Arc::new(Metrics::new());
        let dirty = Arc::new(DirtyScenes::new());
        let broadcaster = Arc::new(EventBroadcaster::new(metrics.clone()));

        let alliance_service = Arc::new(AllianceService::new(
            scenes.clone(),
            alliances.clone(),
            dirty.clone(),
            audit.clone(),
        ));
        let trust_service = Arc::new(TrustService::new(
            scenes.clone(),
            alliances,
            memberships,
            trust_scores,
            dirty,
            metrics.clone(),
            config.recompute_interval,
        ));
        let stream_service = Arc::new(StreamSessionService::new(
            stream_sessions,
            participants,
            participant_events,
            stream_analytics,
            scenes.clone(),
            broadcaster,
            jwt.clone(),
        ));
        // Config load already range-checks the percent.
        let fee_percent = FeePercent::new(config.platform_fee_percent)
            .unwrap_or_else(|_| FeePercent::new(5.0).expect("5.0 is within range"));
        let payment_service = Arc::new(PaymentService::new(
            payments,
            webhook_events,
            idempotency_keys,
            scenes,
            gateway,
            audit.clone(),
            config.stripe_webhook_secret.clone(),
            fee_percent,
            config.environment.clone(),
        ));

        Self {
            jwt,
            metrics,
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_rpm,
                Duration::from_secs(60),
            )),
            audit,
            alliance_service,
            trust_service,
            stream_service,
            payment_service,
        }
    }
}

/// Test/dev configuration that skips environment lookup.
pub fn test_config() -> AppConfig {
    AppConfig {
        environment: Environment::Development,
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: "postgres://unused".to_string(),
        jwt_secret: "test-secret-test-secret-test-secret!".to_string(),
        jwt_previous_secret: None,
        firehose_url: "wss://firehose.example.test/commits".to_string(),
        stripe_secret_key: "sk_test_unused".to_string(),
        stripe_webhook_secret: "whsec_testsecret".to_string(),
        platform_fee_percent: 5.0,
        rank_trust_enabled: true,
        recompute_interval: Duration::from_secs(30),
        rate_limit_rpm: 1000,
        max_upload_bytes: 10 * 1024 * 1024,
    }
}
