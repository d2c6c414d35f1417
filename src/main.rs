//! Trust-broker binary entry point: loads configuration, wires the shared
//! backends (C1/C10/C14/C9), builds [`AppState`] and serves the HTTP router
//! (C11) alongside the background event-listener loop (C8).

use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use broker::cache::{AnyCache, RedisCache};
use broker::config::Config;
use broker::events::listener::{EventListener, Queue};
use broker::events::publisher::{AnyEventPublisher, NullEventPublisher, SnsEventPublisher};
use broker::gateway::GatewayClient;
use broker::http::routes::router;
use broker::http::state::AppState;
use broker::issuance::IssuanceService;
use broker::jwt::JwtDecoder;
use broker::revocation::RevocationService;
use broker::store::{AnyMetadataStore, MongoMetadataStore};
use broker::verification::VerificationService;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Arc::new(Config::load()?);

    let cache = AnyCache::Redis(RedisCache::connect(&config.redis.url(), config.key_prefix.clone()).await?);
    let gateway = GatewayClient::new(config.gateway.clone());

    let mongo_uri = format!(
        "mongodb://{}:{}@{}:{}",
        config.db.user, config.db.password, config.db.host, config.db.port
    );
    let mongo_client = mongodb::Client::with_uri_str(&mongo_uri).await?;
    let database = mongo_client.database(&config.db.name);
    let metadata_store = AnyMetadataStore::Mongo(MongoMetadataStore::new(&database).await?);

    let publisher = match &config.events.topic_arn {
        Some(topic_arn) => {
            let aws_cfg = aws_config::load_defaults(BehaviorVersion::latest()).await;
            AnyEventPublisher::Sns(SnsEventPublisher::new(aws_sdk_sns::Client::new(&aws_cfg), topic_arn.clone()))
        }
        None => AnyEventPublisher::Null(NullEventPublisher),
    };

    let jwt = JwtDecoder::new(cache.clone(), gateway.clone(), None);

    let verification = VerificationService::new(
        cache.clone(),
        jwt.clone(),
        gateway.clone(),
        config.ttl.verification_request(),
        config.ttl.verified_session(),
    );
    let issuance = IssuanceService::new(
        cache.clone(),
        jwt.clone(),
        gateway.clone(),
        metadata_store.clone(),
        config.gateway.token_signing_key.clone(),
        config.gateway.issuing_redirect_uri.clone(),
        config.ttl.credential_metadata(),
    );
    let revocation = Arc::new(RevocationService::new(metadata_store.clone(), gateway.clone(), publisher.clone()));

    let state = AppState {
        config: Arc::clone(&config),
        jwt,
        metadata_store: metadata_store.clone(),
        verification,
        issuance,
        revocation: Arc::clone(&revocation),
    };

    spawn_event_listeners(&config, metadata_store, gateway, publisher).await;
    spawn_jwks_flush_on_sighup(state.jwt.clone());

    let router = router(state);
    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Spawn one long-poll loop per configured queue URL (§4.8). A queue with
/// no URL configured is simply not started.
async fn spawn_event_listeners(
    config: &Config, metadata_store: AnyMetadataStore, gateway: GatewayClient, publisher: AnyEventPublisher,
) {
    let aws_cfg = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let sqs = aws_sdk_sqs::Client::new(&aws_cfg);

    let queues = [
        (config.events.delete_placement_queue_url.clone(), Queue::DeletePlacement),
        (config.events.update_placement_queue_url.clone(), Queue::UpdatePlacement),
        (config.events.delete_programme_membership_queue_url.clone(), Queue::DeleteProgrammeMembership),
        (config.events.update_programme_membership_queue_url.clone(), Queue::UpdateProgrammeMembership),
    ];

    for (queue_url, queue) in queues {
        let Some(queue_url) = queue_url else { continue };
        let revocation = RevocationService::new(metadata_store.clone(), gateway.clone(), publisher.clone());
        let listener = EventListener::new(sqs.clone(), revocation);
        tokio::spawn(async move {
            loop {
                if let Err(err) = listener.poll_once(&queue_url, queue).await {
                    warn!(?queue, error = %err, "event listener poll failed, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        });
    }
}

/// Flush the memoised JWKS cache on `SIGHUP`, so operators can roll the
/// gateway's signing key without a restart (§9).
fn spawn_jwks_flush_on_sighup(jwt: JwtDecoder<AnyCache>) {
    tokio::spawn(async move {
        let Ok(mut hangup) = signal(SignalKind::hangup()) else { return };
        loop {
            hangup.recv().await;
            info!("SIGHUP received, flushing JWKS key cache");
            jwt.flush_all().await;
        }
    });
}
