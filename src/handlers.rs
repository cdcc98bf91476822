//! Handler resolution: which apps can open an event, and at what URL.
//!
//! Apps announce themselves with handler declarations listing the kinds
//! they handle and, per platform, URL templates with a `<bech32>`
//! placeholder. Only the `web` platform is used here.

use nostr_core::kinds::{is_addressable, KIND_HANDLER, KIND_METADATA};
use nostr_core::tags::{identifier, tags_named};
use nostr_core::{
    decode, encode_naddr, encode_nevent, encode_note, encode_nprofile, encode_npub,
    IdentifierType, StructuredAddress,
};
use nostr_sdk::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::cache::Store;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::profile::{non_empty, Profile, ProfileEvent};

pub const PLATFORM_WEB: &str = "web";
pub const URL_PLACEHOLDER: &str = "<bech32>";
pub const MAX_HANDLER_KIND: u64 = 10_000_000;

const NATIVE_PLATFORMS: [&str; 5] = ["android", "ios", "windows", "macos", "linux"];

/// One URL template of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerUrl {
    pub url: String,
    /// Identifier type the template expects; `None` is the catch-all.
    pub target: Option<IdentifierType>,
}

impl HandlerUrl {
    pub fn render(&self, id: &str) -> String {
        self.url.replace(URL_PLACEHOLDER, id)
    }
}

/// One handler declaration, parsed.
#[derive(Debug, Clone)]
pub struct AppHandler {
    pub event: Event,
    pub naddr: String,
    pub profile: Profile,
    /// No own content; the profile is the author's.
    pub inherited_profile: bool,
    pub author_meta: Option<ProfileEvent>,
    pub kinds: Vec<u32>,
    pub platforms: Vec<String>,
    pub urls: Vec<HandlerUrl>,
    pub app_id: String,
    /// Deep link to the resolved event, when a template fits.
    pub event_url: Option<String>,
}

/// Handlers sharing one app id.
#[derive(Debug, Clone)]
pub struct AppEntry {
    pub app_id: String,
    pub handlers: Vec<AppHandler>,
    pub kinds: Vec<u32>,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    pub apps: Vec<AppEntry>,
    /// The address the event URLs were built for.
    pub addr: Option<StructuredAddress>,
}

impl AppRegistry {
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn handlers(&self) -> impl Iterator<Item = &AppHandler> {
        self.apps.iter().flat_map(|a| a.handlers.iter())
    }
}

/// Declared kinds within range, deduplicated in order.
pub fn handler_kinds(event: &Event) -> Vec<u32> {
    let mut kinds = Vec::new();
    for tag in tags_named(event, "k") {
        match tag[1].trim().parse::<u64>() {
            Ok(k) if k <= MAX_HANDLER_KIND => {
                let k = k as u32;
                if !kinds.contains(&k) {
                    kinds.push(k);
                }
            }
            _ => debug!("ignoring handler kind '{}' in {}", tag[1], event.id),
        }
    }
    kinds
}

/// Web URL templates with a recognized (or empty) target type.
pub fn handler_urls(event: &Event) -> Vec<HandlerUrl> {
    tags_named(event, PLATFORM_WEB)
        .filter_map(|tag| {
            let target = tag.get(2).map(String::as_str).unwrap_or("");
            if target.is_empty() {
                return Some(HandlerUrl {
                    url: tag[1].clone(),
                    target: None,
                });
            }
            IdentifierType::from_prefix(target).map(|t| HandlerUrl {
                url: tag[1].clone(),
                target: Some(t),
            })
        })
        .collect()
}

/// Parse handler declarations and group them into apps.
///
/// `metas` supply the profiles handlers without content inherit. Handlers
/// left with no kinds after filtering by `filter_kinds` are skipped.
pub fn prepare_handlers(events: &[Event], metas: &[ProfileEvent], filter_kinds: &[u16]) -> Vec<AppEntry> {
    let mut apps: Vec<AppEntry> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for event in events.iter().filter(|e| e.kind.as_u16() == KIND_HANDLER) {
        let naddr = match encode_naddr(KIND_HANDLER, &event.pubkey, identifier(event), &[]) {
            Ok(naddr) => naddr,
            Err(e) => {
                warn!("cannot encode handler {}: {e:#}", event.id);
                continue;
            }
        };

        let mut kinds = handler_kinds(event);
        if !filter_kinds.is_empty() {
            kinds.retain(|k| filter_kinds.iter().any(|f| u32::from(*f) == *k));
        }
        if kinds.is_empty() {
            continue;
        }

        let author_meta = metas.iter().find(|m| m.pubkey() == event.pubkey).cloned();
        let inherited_profile = event.content.is_empty();
        let profile = if inherited_profile {
            author_meta.as_ref().map(|m| m.profile.clone()).unwrap_or_default()
        } else {
            Profile::parse(&event.content)
        };

        let urls = handler_urls(event);
        let platforms = if urls.is_empty() {
            Vec::new()
        } else {
            vec![PLATFORM_WEB.to_string()]
        };

        let app_id = if inherited_profile {
            identifier(event).to_string()
        } else {
            non_empty(&profile.name)
                .or_else(|| non_empty(&profile.display_name))
                .unwrap_or("")
                .to_string()
        };

        let slot = *slots.entry(app_id.clone()).or_insert_with(|| {
            apps.push(AppEntry {
                app_id: app_id.clone(),
                handlers: Vec::new(),
                kinds: Vec::new(),
                platforms: Vec::new(),
            });
            apps.len() - 1
        });
        let app = &mut apps[slot];
        app.kinds.extend(kinds.iter().copied());
        app.platforms.extend(platforms.iter().cloned());
        app.handlers.push(AppHandler {
            event: event.clone(),
            naddr,
            profile,
            inherited_profile,
            author_meta,
            kinds,
            platforms,
            urls,
            app_id,
            event_url: None,
        });
    }

    apps
}

/// Identifiers to try for `addr`, most preferred first.
///
/// Profiles try author keys first and addressable kinds the coordinate;
/// every kind then falls back to the event id.
fn candidate_ids(addr: &StructuredAddress) -> Vec<(IdentifierType, String)> {
    let Some(kind) = addr.kind else {
        return Vec::new();
    };

    let mut candidates: Vec<(IdentifierType, anyhow::Result<String>)> = Vec::new();
    if let Some(pubkey) = addr.pubkey {
        if kind == KIND_METADATA {
            candidates.push((IdentifierType::Npub, encode_npub(&pubkey)));
            candidates.push((
                IdentifierType::Nprofile,
                encode_nprofile(&pubkey, &addr.relays),
            ));
        } else if is_addressable(kind) {
            let d = addr.identifier.as_deref().unwrap_or("");
            candidates.push((
                IdentifierType::Naddr,
                encode_naddr(kind, &pubkey, d, &addr.relays),
            ));
        }
    }
    if let Some(id) = addr.event_id {
        candidates.push((
            IdentifierType::Nevent,
            encode_nevent(&id, addr.pubkey.as_ref(), &addr.relays),
        ));
        candidates.push((IdentifierType::Note, encode_note(&id)));
    }

    candidates
        .into_iter()
        .filter_map(|(ty, encoded)| match encoded {
            Ok(id) => Some((ty, id)),
            Err(e) => {
                debug!("cannot encode {ty}: {e:#}");
                None
            }
        })
        .collect()
}

/// Deep link for `addr` from the handler's templates.
///
/// Candidates are tried in order; each uses a template of its own type,
/// else the catch-all.
pub fn handler_url(handler: &AppHandler, addr: &StructuredAddress) -> Option<String> {
    let catch_all = handler.urls.iter().find(|u| u.target.is_none());
    candidate_ids(addr).into_iter().find_map(|(ty, id)| {
        handler
            .urls
            .iter()
            .find(|u| u.target == Some(ty))
            .or(catch_all)
            .map(|u| u.render(&id))
    })
}

// ── App directory ────────────────────────────────────────────────

/// A directory listing entry.
#[derive(Debug, Clone)]
pub struct AppSummary {
    pub naddr: String,
    pub name: String,
    pub website: String,
    pub picture: String,
    pub about: String,
    pub kinds: Vec<u32>,
    /// Web URL template per handled kind.
    pub handlers: Vec<(u32, HandlerUrl)>,
}

/// Whether the first platform tag of the handler is `web` (or there is none).
pub fn is_web(event: &Event) -> bool {
    for tag in event.tags.iter().map(|t| t.as_slice()) {
        match tag.first().map(String::as_str) {
            Some(PLATFORM_WEB) => return true,
            Some(p) if NATIVE_PLATFORMS.contains(&p) => return false,
            _ => {}
        }
    }
    true
}

fn kind_template(urls: &[HandlerUrl], kind: u32) -> Option<HandlerUrl> {
    let typed: Vec<&HandlerUrl> = urls.iter().filter(|u| u.target.is_some()).collect();
    let preferred = if kind == u32::from(KIND_METADATA) {
        typed
            .iter()
            .find(|u| matches!(u.target, Some(IdentifierType::Npub | IdentifierType::Nprofile)))
    } else if kind <= u32::from(u16::MAX) && is_addressable(kind as u16) {
        typed
            .iter()
            .find(|u| u.target == Some(IdentifierType::Naddr))
    } else {
        None
    };
    preferred.or(typed.first()).map(|u| (*u).clone())
}

/// Summarise one handler for the directory. Unnamed or site-less apps are skipped.
pub fn summarize_app(event: &Event, author: Option<&ProfileEvent>) -> Option<AppSummary> {
    if !is_web(event) {
        return None;
    }
    let profile = if event.content.is_empty() {
        author.map(|a| a.profile.clone()).unwrap_or_default()
    } else {
        Profile::parse(&event.content)
    };

    let urls = handler_urls(event);
    let mut kinds = Vec::new();
    let mut handlers = Vec::new();
    for kind in handler_kinds(event) {
        if let Some(template) = kind_template(&urls, kind) {
            kinds.push(kind);
            handlers.push((kind, template));
        }
    }

    let name = profile.display()?.to_string();
    let website = non_empty(&profile.website)?.to_string();
    let naddr = encode_naddr(KIND_HANDLER, &event.pubkey, identifier(event), &[]).ok()?;
    Some(AppSummary {
        naddr,
        name,
        website,
        picture: profile.picture.clone().unwrap_or_default(),
        about: profile.about.clone().unwrap_or_default(),
        kinds,
        handlers,
    })
}

impl Fetcher {
    /// Handler declarations for `kinds`, grouped into apps.
    pub async fn fetch_apps_by_kinds(&self, kinds: &[u16]) -> Vec<AppEntry> {
        let mut filter = Filter::new()
            .kind(Kind::from(KIND_HANDLER))
            .limit(self.config().fetch.handler_limit);
        if !kinds.is_empty() {
            filter = filter.custom_tags(
                SingleLetterTag::lowercase(Alphabet::K),
                kinds.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            );
        }

        let handlers = self.ranked_or_broad(filter).await.events;
        debug!("handler events for kinds {kinds:?}: {}", handlers.len());
        if handlers.is_empty() {
            return Vec::new();
        }

        let authors: Vec<PublicKey> = handlers.iter().map(|e| e.pubkey).collect();
        let metas = self.fetch_metas(&authors).await;
        prepare_handlers(&handlers, &metas, kinds)
    }

    /// Apps able to open the event at `addr`, with a deep link per handler.
    ///
    /// The event is fetched first when its kind is unknown. Non-empty
    /// registries are cached per kind for the session.
    pub async fn apps_for(&self, mut addr: StructuredAddress) -> Result<AppRegistry> {
        if addr.kind.is_none() {
            let event = self.resolve_by_address(&addr).await.ok_or_else(|| {
                Error::UnresolvedAddress(
                    addr.event_id
                        .map(|id| id.to_hex())
                        .unwrap_or_else(|| "target event".to_string()),
                )
            })?;
            addr.complete_from(&event);
        }
        let Some(kind) = addr.kind else {
            return Err(Error::UnresolvedAddress("event kind".to_string()));
        };
        debug!("resolved addr {addr:?}");

        let apps = match self.caches().apps_by_kind.get(&kind) {
            Some(cached) => {
                debug!("apps for kind {kind} in cache");
                cached.apps
            }
            None => self.fetch_apps_by_kinds(&[kind]).await,
        };
        if !apps.is_empty() {
            self.caches().apps_by_kind.put(
                kind,
                AppRegistry {
                    apps: apps.clone(),
                    addr: None,
                },
            );
        }

        let mut registry = AppRegistry {
            apps,
            addr: Some(addr),
        };
        if let Some(addr) = registry.addr.clone() {
            for app in &mut registry.apps {
                for handler in &mut app.handlers {
                    handler.event_url = handler_url(handler, &addr);
                }
            }
        }
        Ok(registry)
    }

    /// [`Fetcher::apps_for`] for an identifier string.
    pub async fn apps_for_identifier(&self, identifier: &str) -> Result<AppRegistry> {
        let addr = decode(identifier)
            .map_err(|e| Error::MalformedIdentifier(format!("{identifier}: {e:#}")))?;
        self.apps_for(addr).await
    }

    /// The app directory: best-ranked web apps first.
    pub async fn top_apps(&self, limit: usize) -> Vec<AppSummary> {
        let filter = Filter::new()
            .kind(Kind::from(KIND_HANDLER))
            .limit(limit);
        let ranked = self.ranked_or_broad(filter).await;
        info!("top app events {} (ranked: {})", ranked.events.len(), ranked.ranked);

        let mut events = ranked.events;
        if !ranked.ranked {
            events.sort_by_key(|e| {
                std::cmp::Reverse(
                    nostr_core::tags::tag_value(e, "published_at")
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0),
                )
            });
        }
        if events.is_empty() {
            return Vec::new();
        }

        let authors: Vec<PublicKey> = events.iter().map(|e| e.pubkey).collect();
        let metas = self.fetch_metas(&authors).await;
        events
            .iter()
            .filter_map(|e| {
                let author = metas.iter().find(|m| m.pubkey() == e.pubkey);
                summarize_app(e, author)
            })
            .take(limit)
            .collect()
    }
}
