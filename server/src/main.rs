mod email;
mod error;
mod gmail_client;
mod inbound;
mod processor;
mod queue_jobs;
mod rate_limiters;
mod request_tracing;
mod routes;
mod scheduler;
mod server_config;
mod sweeper;

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::{extract::FromRef, Router};
use futures::future::join_all;
use gmail_client::GmailClientFactory;
use inbound::PushVerifier;
use lib_queue::{JobState, Queue, RedisBackend};
use mimalloc::MiMalloc;
use rate_limiters::RateLimiters;
use routes::AppRouter;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

/// Newtype wrappers so axum's `FromRef` can pick the right queue out of
/// `ServerState` without ambiguity — all four wrap the same `Queue<RedisBackend>`
/// type, so the wrapper struct is what disambiguates them.
#[derive(Clone)]
pub struct SequenceQueue(pub Arc<Queue<RedisBackend>>);
#[derive(Clone)]
pub struct EmailQueue(pub Arc<Queue<RedisBackend>>);
#[derive(Clone)]
pub struct ContactQueue(pub Arc<Queue<RedisBackend>>);
#[derive(Clone)]
pub struct ThreadWatchQueue(pub Arc<Queue<RedisBackend>>);

#[derive(Clone, FromRef)]
pub struct ServerState {
    http_client: HttpClient,
    conn: DatabaseConnection,
    rate_limiters: RateLimiters,
    gmail_clients: GmailClientFactory,
    push_verifier: PushVerifier,
    sequence_queue: SequenceQueue,
    email_queue: EmailQueue,
    contact_queue: ContactQueue,
    thread_watch_queue: ThreadWatchQueue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env::set_var("RUST_LOG", "info");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_env("RUST_LOG"))
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let mut db_options = ConnectOptions::new(server_config::cfg.database_url.clone());
    db_options.sqlx_logging(false);
    let conn = Database::connect(db_options)
        .await
        .expect("database connection failed");

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .build()?;

    let redis_url = server_config::cfg.redis_url();
    let prefix = &server_config::cfg.queue_prefix;
    let sequence_queue = SequenceQueue(Arc::new(Queue::new(RedisBackend::new(
        &redis_url,
        &format!("{prefix}-sequence-jobs"),
    )?)));
    let email_queue = EmailQueue(Arc::new(Queue::new(RedisBackend::new(
        &redis_url,
        &format!("{prefix}-email-jobs"),
    )?)));
    let contact_queue = ContactQueue(Arc::new(Queue::new(RedisBackend::new(
        &redis_url,
        &format!("{prefix}-contact-jobs"),
    )?)));
    let thread_watch_queue = ThreadWatchQueue(Arc::new(Queue::new(RedisBackend::new(
        &redis_url,
        &format!("{prefix}-thread-watch-jobs"),
    )?)));

    let state = ServerState {
        gmail_clients: GmailClientFactory::new(http_client.clone(), conn.clone()),
        push_verifier: PushVerifier::new(http_client.clone()),
        rate_limiters: RateLimiters::from_env(),
        http_client,
        conn,
        sequence_queue: sequence_queue.clone(),
        email_queue: email_queue.clone(),
        contact_queue: contact_queue.clone(),
        thread_watch_queue: thread_watch_queue.clone(),
    };

    let router = AppRouter::create(state.clone());

    let sweeper_handle = tokio::spawn(sweeper::run(state.clone()));

    let consumer_handles = vec![
        spawn_consumer(state.clone(), sequence_queue.0),
        spawn_consumer(state.clone(), email_queue.0),
        spawn_consumer(state.clone(), contact_queue.0),
        spawn_consumer(state.clone(), thread_watch_queue.0),
    ];

    let shutdown_handle = tokio::spawn(async move {
        if env::var("NO_SHUTDOWN").unwrap_or_else(|_| "false".to_string()) == "true" {
            return;
        }
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
        tracing::info!("received Ctrl+C, shutting down");
        std::process::exit(0);
    });

    let mut handles = vec![run_server(router), shutdown_handle, sweeper_handle];
    handles.extend(consumer_handles);
    join_all(handles).await;

    Ok(())
}

/// One polling loop per named queue. Plain `dequeue`/`complete` over
/// `lib_queue::Queue` rather than a time-based scheduler, since each queue
/// drains a durable backlog of work rather than firing on a clock.
fn spawn_consumer(state: ServerState, queue: Arc<Queue<RedisBackend>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match queue.dequeue().await {
                Ok(Some(entry)) => {
                    let job_type = entry.job_type().to_string();
                    let payload = entry.payload().clone();
                    let entry_id = entry.id();

                    let result = queue_jobs::run_entry(&state, &job_type, &payload)
                        .await
                        .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e.into() });
                    let error_message = result.as_ref().err().map(|e| e.to_string());

                    if let Err(e) = queue.complete(entry_id, result).await {
                        tracing::error!("failed to mark job {} complete: {:?}", entry_id, e);
                    }

                    if job_type == "email-job" {
                        if let Some(error_message) = error_message {
                            handle_possible_email_death(&state, &queue, entry_id, &payload, &error_message).await;
                        }
                    }
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                Err(e) => {
                    tracing::error!("queue dequeue failed: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

/// Once a failed `email-job` has been given back to the queue, checks
/// whether that failure exhausted its retries (state `Dead`) and, if so,
/// runs the failure bookkeeping the queue itself has no opinion on.
async fn handle_possible_email_death(
    state: &ServerState,
    queue: &Queue<RedisBackend>,
    entry_id: lib_queue::JobId,
    payload: &serde_json::Value,
    error_message: &str,
) {
    let dead = match queue.get_job(entry_id).await {
        Ok(Some(updated)) => updated.state() == &JobState::Dead,
        Ok(None) => false,
        Err(e) => {
            tracing::error!("failed to look up job {entry_id} after failure: {:?}", e);
            false
        }
    };
    if !dead {
        return;
    }

    let job: queue_jobs::EmailJob = match serde_json::from_value(payload.clone()) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!("failed to decode dead email-job {entry_id}: {:?}", e);
            return;
        }
    };

    if let Err(e) = email::worker::handle_exhausted_retries(state, &job, error_message).await {
        tracing::error!("failed to record exhausted email job {entry_id}: {:?}", e);
    }
}

fn run_server(router: Router) -> JoinHandle<()> {
    tokio::spawn(async move {
        let port = server_config::cfg.port;
        tracing::info!("sequencer listening on http://0.0.0.0:{port}");
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, router).await.unwrap();
    })
}
