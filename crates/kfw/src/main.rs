use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tracing::{info, warn};

use kfw_core::{
    config::Config,
    dispatch::Dispatcher,
    domain::UserId,
    messaging::{
        port::MessagingPort,
        throttled::{SendPacing, ThrottledMessenger},
        types::OutgoingMessage,
    },
    poller::{Poller, PollerSettings},
    store::{JsonQueryStore, JsonSeenStore},
};
use kfw_kufar::{KufarClient, KufarConfig};
use kfw_telegram::TelegramMessenger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kfw_core::logging::init("kfw")?;

    let cfg = Arc::new(Config::load()?);
    info!(
        queries = %cfg.queries_file.display(),
        seen = %cfg.seen_file.display(),
        phone_lookup = cfg.kufar_token.is_some(),
        "kfw starting"
    );

    let market = Arc::new(
        KufarClient::new(KufarConfig::from(cfg.as_ref())).context("kufar client")?,
    );

    // Wrap the raw Telegram messenger with a throttling decorator; the adapter
    // itself still retries a 429 RetryAfter once.
    let raw_messenger: Arc<dyn MessagingPort> =
        Arc::new(TelegramMessenger::from_token(cfg.telegram_bot_token.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        SendPacing::default(),
    ));

    send_startup_notice(&cfg, messenger.clone()).await;

    let poller = Poller::new(
        PollerSettings::from(cfg.as_ref()),
        Arc::new(JsonQueryStore::new(cfg.queries_file.clone())),
        Arc::new(JsonSeenStore::new(cfg.seen_file.clone())),
        market,
        Dispatcher::new(messenger),
    );

    tokio::select! {
        _ = poller.run() => {}
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            info!("interrupted, shutting down");
        }
    }

    Ok(())
}

/// Best-effort "watcher is up" message to every admin.
async fn send_startup_notice(cfg: &Config, messenger: Arc<dyn MessagingPort>) {
    let notice = OutgoingMessage::Text {
        html: format!(
            "✅ <b>Kufar watcher started</b>\nPolling every {}s.",
            cfg.delay_main_loop.as_secs()
        ),
        button: None,
    };
    for &admin in &cfg.admin_ids {
        let res = tokio::time::timeout(
            Duration::from_secs(10),
            messenger.send(UserId(admin), &notice),
        )
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(chat_id = admin, error = %e, "startup notice failed"),
            Err(_) => warn!(chat_id = admin, "startup notice timed out"),
        }
    }
}
