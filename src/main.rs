use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use nostr_apps::augment::{Community, LiveEvent, LongNote, Zap};
use nostr_apps::{AppsClient, AuthoredEvent, Config, ProfileEvent, StructuredAddress, WalletInfo};
use nostr_core::kinds::KIND_CONTACT_LIST;
use nostr_core::tags::unique_values;
use nostr_sdk::prelude::*;
use serde_json::{json, Value};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WALLET_SECRET_ENV: &str = "NOSTR_APPS_WALLET_SECRET";

#[derive(Parser)]
#[command(name = "nostr-apps")]
#[command(about = "Resolve Nostr identifiers and find the apps that open them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the newest event behind an identifier
    Resolve { identifier: String },
    /// List handler apps for an identifier, or the app directory without one
    Apps {
        identifier: Option<String>,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
    /// Find the first identifier in a piece of text
    Scan {
        text: String,
        /// Also accept a bare 64-char hex id
        #[arg(long)]
        hex: bool,
    },
    /// Full-text search
    Search {
        #[arg(value_enum)]
        what: SearchKind,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Feeds built from the contact list of a key
    Feed {
        #[arg(value_enum)]
        what: FeedKind,
        /// npub or hex key whose contacts to follow
        pubkey: String,
        /// Minimum zap amount in sats
        #[arg(long)]
        min_zap: Option<u64>,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
    /// Follow a live channel until interrupted
    Watch {
        #[arg(value_enum)]
        what: WatchKind,
        pubkeys: Vec<String>,
    },
    /// Pay a lightning invoice through a wallet-connect service
    Pay {
        invoice: String,
        #[arg(long)]
        wallet_relay: String,
        #[arg(long)]
        wallet_pubkey: String,
        /// Client secret (nsec or hex); read from NOSTR_APPS_WALLET_SECRET when absent
        #[arg(long)]
        secret: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchKind {
    Profiles,
    Notes,
    Long,
    Live,
    Communities,
}

#[derive(Clone, Copy, ValueEnum)]
enum FeedKind {
    Long,
    Highlights,
    Zaps,
    Communities,
    Live,
}

#[derive(Clone, Copy, ValueEnum)]
enum WatchKind {
    Profiles,
    Contacts,
    Bookmarks,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).with_context(|| "Failed to load config")?;
    init_logging(&config.logging.level)?;
    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    if let Commands::Scan { text, hex } = &cli.command {
        match nostr_apps::scan(text, *hex) {
            Some(id) => println!("{id}"),
            None => println!("no identifier found"),
        }
        return Ok(());
    }

    let client = AppsClient::connect(config)
        .await
        .with_context(|| "Failed to connect to relays")?;

    match cli.command {
        Commands::Resolve { identifier } => {
            let event = client.resolve(&identifier).await?;
            let canonical = nostr_apps::encode_for_event(&event, None)?;
            print_json(&json!({ "id": canonical, "event": event }))
        }
        Commands::Apps { identifier, limit } => match identifier {
            Some(identifier) => {
                let registry = client.fetcher().apps_for_identifier(&identifier).await?;
                let apps: Vec<Value> = registry
                    .handlers()
                    .map(|h| {
                        json!({
                            "app": h.app_id,
                            "name": h.profile.display(),
                            "naddr": h.naddr,
                            "kinds": h.kinds,
                            "platforms": h.platforms,
                            "url": h.event_url,
                        })
                    })
                    .collect();
                print_json(&Value::Array(apps))
            }
            None => {
                let apps: Vec<Value> = client
                    .fetcher()
                    .top_apps(limit)
                    .await
                    .into_iter()
                    .map(|a| {
                        json!({
                            "name": a.name,
                            "naddr": a.naddr,
                            "website": a.website,
                            "about": a.about,
                            "kinds": a.kinds,
                        })
                    })
                    .collect();
                print_json(&Value::Array(apps))
            }
        },
        Commands::Search { what, query, limit } => {
            let limit = limit.unwrap_or(client.config().fetch.search_limit);
            search(&client, what, &query, limit).await
        }
        Commands::Feed {
            what,
            pubkey,
            min_zap,
            limit,
        } => {
            let pubkey = PublicKey::parse(&pubkey).with_context(|| "Invalid pubkey")?;
            let contacts = contacts_of(&client, pubkey).await;
            tracing::info!("following {} contact(s)", contacts.len());
            feed(&client, what, &contacts, min_zap, limit).await
        }
        Commands::Watch { what, pubkeys } => {
            let pubkeys = pubkeys
                .iter()
                .map(|p| PublicKey::parse(p))
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| "Invalid pubkey")?;
            watch(&client, what, &pubkeys).await
        }
        Commands::Pay {
            invoice,
            wallet_relay,
            wallet_pubkey,
            secret,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => std::env::var(WALLET_SECRET_ENV)
                    .with_context(|| format!("No --secret and {WALLET_SECRET_ENV} is unset"))?,
            };
            let keys = Keys::parse(&secret).with_context(|| "Failed to parse wallet secret")?;
            let wallet = WalletInfo {
                relay: wallet_relay,
                public_key: PublicKey::parse(&wallet_pubkey)
                    .with_context(|| "Invalid wallet pubkey")?,
            };
            let receipt = client.send_payment(&keys, &wallet, &invoice).await?;
            print_json(&json!({ "preimage": receipt.preimage }))
        }
        Commands::Scan { .. } => Ok(()),
    }
}

async fn contacts_of(client: &AppsClient, pubkey: PublicKey) -> Vec<PublicKey> {
    let addr = StructuredAddress {
        kind: Some(KIND_CONTACT_LIST),
        pubkey: Some(pubkey),
        ..Default::default()
    };
    match client.resolve_by_address(&addr).await {
        Some(list) => unique_values(&list, "p")
            .iter()
            .filter_map(|pk| PublicKey::from_hex(pk).ok())
            .collect(),
        None => {
            tracing::warn!("no contact list for {pubkey}");
            Vec::new()
        }
    }
}

async fn search(client: &AppsClient, what: SearchKind, query: &str, limit: usize) -> Result<()> {
    let fetcher = client.fetcher();
    let items: Vec<Value> = match what {
        SearchKind::Profiles => fetcher
            .search_profiles(query, limit)
            .await
            .iter()
            .map(profile_json)
            .collect(),
        SearchKind::Notes => fetcher
            .search_notes(query, limit)
            .await
            .iter()
            .map(authored_json)
            .collect(),
        SearchKind::Long => fetcher
            .search_long_notes(query, limit)
            .await
            .iter()
            .map(long_note_json)
            .collect(),
        SearchKind::Live => fetcher
            .search_live_events(query, limit)
            .await
            .iter()
            .map(live_json)
            .collect(),
        SearchKind::Communities => fetcher
            .search_communities(query, limit)
            .await
            .iter()
            .map(community_json)
            .collect(),
    };
    print_json(&Value::Array(items))
}

async fn feed(
    client: &AppsClient,
    what: FeedKind,
    contacts: &[PublicKey],
    min_zap: Option<u64>,
    limit: usize,
) -> Result<()> {
    let fetcher = client.fetcher();
    let items: Vec<Value> = match what {
        FeedKind::Long => fetcher
            .followed_long_notes(contacts)
            .await
            .iter()
            .map(long_note_json)
            .collect(),
        FeedKind::Highlights => fetcher
            .followed_highlights(contacts)
            .await
            .iter()
            .map(authored_json)
            .collect(),
        FeedKind::Zaps => fetcher
            .followed_zaps(contacts, min_zap)
            .await
            .iter()
            .map(zap_json)
            .collect(),
        FeedKind::Communities => fetcher
            .followed_communities(contacts)
            .await
            .iter()
            .map(community_json)
            .collect(),
        FeedKind::Live => fetcher
            .followed_live_events(contacts, limit)
            .await
            .iter()
            .map(live_json)
            .collect(),
    };
    print_json(&Value::Array(items))
}

async fn watch(client: &AppsClient, what: WatchKind, pubkeys: &[PublicKey]) -> Result<()> {
    let first = pubkeys
        .first()
        .copied()
        .with_context(|| "At least one pubkey is required")?;

    let mut stream: futures_util::stream::BoxStream<'static, Value> = match what {
        WatchKind::Profiles => client
            .subscribe_profiles(pubkeys)
            .await?
            .map(|p| profile_json(&p))
            .boxed(),
        WatchKind::Contacts => client
            .subscribe_contact_list(first)
            .await?
            .map(|list| {
                json!({
                    "created_at": timestamp(list.event.created_at.as_secs()),
                    "contacts": list.contact_pubkeys.len(),
                    "profiles": list.contacts.iter().map(profile_json).collect::<Vec<_>>(),
                })
            })
            .boxed(),
        WatchKind::Bookmarks => client
            .subscribe_bookmark_list(first)
            .await?
            .map(|list| {
                json!({
                    "created_at": timestamp(list.event.created_at.as_secs()),
                    "bookmarks": list.bookmarks.iter().map(authored_json).collect::<Vec<_>>(),
                })
            })
            .boxed(),
    };

    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(value) => print_json(&value)?,
                None => break,
            },
            _ = signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn timestamp(secs: u64) -> Option<String> {
    chrono::DateTime::from_timestamp(i64::try_from(secs).ok()?, 0).map(|t| t.to_rfc3339())
}

fn profile_json(p: &ProfileEvent) -> Value {
    json!({
        "npub": p.npub,
        "name": p.profile.display(),
        "about": p.profile.about,
        "nip05": p.profile.nip05,
        "lud16": p.profile.lud16,
    })
}

fn authored_json(a: &AuthoredEvent) -> Value {
    json!({
        "id": a.event.id.to_hex(),
        "created_at": timestamp(a.event.created_at.as_secs()),
        "author": a.author.as_ref().and_then(|m| m.profile.display()),
        "content": a.event.content,
    })
}

fn long_note_json(n: &LongNote) -> Value {
    json!({
        "id": nostr_apps::encode_for_event(&n.event, None).ok(),
        "title": n.title,
        "summary": n.summary,
        "published_at": n.published_at.and_then(timestamp),
        "author": n.author.as_ref().and_then(|m| m.profile.display()),
    })
}

fn zap_json(z: &Zap) -> Value {
    json!({
        "sats": z.amount_sats(),
        "target": z.target_event_id.to_hex(),
        "recipient": z.target_meta.as_ref().and_then(|m| m.profile.display()),
        "sender": z.sender_meta.as_ref().and_then(|m| m.profile.display()),
        "provider": z.provider_meta.as_ref().and_then(|m| m.profile.display()),
        "created_at": timestamp(z.event.created_at.as_secs()),
    })
}

fn live_json(e: &LiveEvent) -> Value {
    json!({
        "title": e.title,
        "status": e.status,
        "starts": timestamp(e.starts),
        "participants": e.current_participants,
        "host": e.host_meta.as_ref().and_then(|m| m.profile.display()),
        "members": e.members.len(),
    })
}

fn community_json(c: &Community) -> Value {
    json!({
        "name": c.name,
        "description": c.description,
        "moderators": c.moderators.len(),
        "posts": c.posts,
        "last_post_at": c.last_post_at.and_then(timestamp),
        "owner": c.author.as_ref().and_then(|m| m.profile.display()),
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();

    Ok(())
}
