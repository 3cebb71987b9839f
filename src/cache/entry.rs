//! Cached output variations.
//!
//! A [`CacheEntry`] is filled once while a resource is rendered, frozen with
//! [`CacheEntry::complete`], and then replayed to any number of requests through an
//! [`OutputSink`] without rendering again.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use time::{Duration, OffsetDateTime, Time, UtcOffset};
use tracing::{debug, trace};
use uuid::Uuid;

use super::error::CacheError;
use super::keys::CacheKey;
use super::lru::Cacheable;
use super::registry::VariationRegistry;

/// Request parameters: name -> values, in a stable order.
pub type ParameterMap = BTreeMap<String, Vec<String>>;

/// Response headers: name -> values.
pub type HeaderMap = BTreeMap<String, Vec<String>>;

const BASE_COST: usize = 64;
const REDIRECT_COST: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// A rendered output fragment.
    Bytes(Bytes),
    /// A nested include rendered at service time with its own parameter snapshot.
    Include {
        target: String,
        parameters: ParameterMap,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub target: String,
    pub permanent: bool,
}

/// Parameters of the request an entry is being serviced for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlexRequest {
    parameters: ParameterMap,
}

impl FlexRequest {
    pub fn new(parameters: ParameterMap) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    /// Merges `overlay` over the current parameters and returns the previous map.
    pub fn overlay_parameters(&mut self, overlay: &ParameterMap) -> ParameterMap {
        let mut merged = self.parameters.clone();
        merged.extend(
            overlay
                .iter()
                .map(|(name, values)| (name.clone(), values.clone())),
        );
        std::mem::replace(&mut self.parameters, merged)
    }

    pub fn restore_parameters(&mut self, previous: ParameterMap) {
        self.parameters = previous;
    }
}

/// Destination of replayed output.
pub trait OutputSink {
    fn set_header(&mut self, name: &str, values: &[String]);

    /// `last_fragment` is a flush hint set when the entry consists of a single fragment.
    fn write(&mut self, bytes: &[u8], last_fragment: bool) -> io::Result<()>;

    fn redirect(&mut self, target: &str, permanent: bool) -> io::Result<()>;
}

/// Renders include targets while an entry is serviced. May consult the cache again.
pub trait IncludeDispatcher {
    fn include(
        &self,
        target: &str,
        request: &mut FlexRequest,
        sink: &mut dyn OutputSink,
    ) -> Result<(), CacheError>;
}

impl<F> IncludeDispatcher for F
where
    F: Fn(&str, &mut FlexRequest, &mut dyn OutputSink) -> Result<(), CacheError>,
{
    fn include(
        &self,
        target: &str,
        request: &mut FlexRequest,
        sink: &mut dyn OutputSink,
    ) -> Result<(), CacheError> {
        self(target, request, sink)
    }
}

/// An [`OutputSink`] that collects everything in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferedOutput {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub redirect: Option<Redirect>,
    pub flushed: bool,
}

impl OutputSink for BufferedOutput {
    fn set_header(&mut self, name: &str, values: &[String]) {
        self.headers.insert(name.to_string(), values.to_vec());
    }

    fn write(&mut self, bytes: &[u8], last_fragment: bool) -> io::Result<()> {
        self.body.extend_from_slice(bytes);
        self.flushed |= last_fragment;
        Ok(())
    }

    fn redirect(&mut self, target: &str, permanent: bool) -> io::Result<()> {
        self.redirect = Some(Redirect {
            target: target.to_string(),
            permanent,
        });
        Ok(())
    }
}

#[derive(Debug)]
struct VariationLink {
    key: CacheKey,
    registry: Weak<VariationRegistry>,
}

/// One materialized output variation.
#[derive(Debug)]
pub struct CacheEntry {
    id: Uuid,
    elements: Vec<Element>,
    headers: HeaderMap,
    redirect: Option<Redirect>,
    date_expires: Option<OffsetDateTime>,
    date_last_modified: Option<OffsetDateTime>,
    completed: bool,
    cost: usize,
    link: OnceLock<VariationLink>,
    removed: AtomicBool,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheEntry {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            elements: Vec::new(),
            headers: HeaderMap::new(),
            redirect: None,
            date_expires: None,
            date_last_modified: None,
            completed: false,
            cost: BASE_COST,
            link: OnceLock::new(),
            removed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn is_frozen(&self) -> bool {
        self.completed || self.redirect.is_some()
    }

    pub fn append_bytes(&mut self, bytes: impl Into<Bytes>) {
        if self.is_frozen() {
            return;
        }
        let bytes = bytes.into();
        self.cost += bytes.len();
        self.elements.push(Element::Bytes(bytes));
    }

    /// Appends an include directive. `None` parameters are stored as an empty map.
    pub fn append_include(&mut self, target: impl Into<String>, parameters: Option<ParameterMap>) {
        if self.is_frozen() {
            return;
        }
        let target = target.into();
        let parameters = parameters.unwrap_or_default();
        self.cost += target.len() + map_cost(&parameters);
        self.elements.push(Element::Include { target, parameters });
    }

    pub fn set_headers(&mut self, headers: HeaderMap) {
        if self.is_frozen() {
            return;
        }
        self.cost = self.cost - map_cost(&self.headers) + map_cost(&headers);
        self.headers = headers;
    }

    /// Turns the entry into a pure redirect. An empty target is ignored.
    pub fn set_redirect(&mut self, target: impl Into<String>, permanent: bool) {
        let target = target.into();
        if self.completed || target.is_empty() {
            return;
        }
        self.elements.clear();
        self.headers.clear();
        self.cost = REDIRECT_COST + target.len();
        self.redirect = Some(Redirect { target, permanent });
    }

    pub fn complete(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn redirect(&self) -> Option<&Redirect> {
        self.redirect.as_ref()
    }

    pub fn date_expires(&self) -> Option<OffsetDateTime> {
        self.date_expires
    }

    pub fn set_date_expires(&mut self, expires: Option<OffsetDateTime>) {
        self.date_expires = expires;
    }

    pub fn date_last_modified(&self) -> Option<OffsetDateTime> {
        self.date_last_modified
    }

    pub fn set_date_last_modified(&mut self, last_modified: Option<OffsetDateTime>) {
        self.date_last_modified = last_modified;
    }

    /// An entry is expired once its expiry lies strictly before `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.date_expires.is_some_and(|expires| expires < now)
    }

    pub fn set_date_expires_to_next_timeout(&mut self, interval_minutes: i64) {
        self.set_date_expires_to_next_timeout_at(interval_minutes, OffsetDateTime::now_utc());
    }

    /// Expires the entry at the first multiple of `interval_minutes` after `now`, counted
    /// from the start of the current UTC day.
    ///
    /// Ignored for non-positive intervals, intervals too long to represent and entries
    /// that are not completed. A boundary past the representable date range leaves the
    /// entry without an expiry.
    pub fn set_date_expires_to_next_timeout_at(
        &mut self,
        interval_minutes: i64,
        now: OffsetDateTime,
    ) {
        if interval_minutes <= 0 || !self.completed {
            return;
        }
        let Some(interval_ns) = interval_minutes.checked_mul(60 * 1_000_000_000) else {
            debug!(interval_minutes, "Expiry interval out of range; entry keeps no expiry");
            return;
        };

        let now = now.to_offset(UtcOffset::UTC);
        let day_start = now.replace_time(Time::MIDNIGHT);
        let elapsed_ns = i64::try_from((now - day_start).whole_nanoseconds()).unwrap_or(0);
        let into_interval = Duration::nanoseconds(elapsed_ns % interval_ns);

        self.date_expires = now
            .checked_sub(into_interval)
            .and_then(|boundary| boundary.checked_add(Duration::nanoseconds(interval_ns)));
    }

    /// Links the entry to the registry it must leave when the cache drops it.
    ///
    /// Only the first link is kept.
    pub fn attach_variation(&self, key: CacheKey, registry: &Arc<VariationRegistry>) -> bool {
        self.link
            .set(VariationLink {
                key,
                registry: Arc::downgrade(registry),
            })
            .is_ok()
    }

    /// Replays the entry.
    ///
    /// Incomplete entries produce no output. Include parameters are overlaid on the
    /// request only for the duration of their include.
    pub fn service(
        &self,
        request: &mut FlexRequest,
        sink: &mut dyn OutputSink,
        dispatcher: &dyn IncludeDispatcher,
    ) -> Result<(), CacheError> {
        if !self.completed {
            debug!(entry_id = %self.id, "Skipping service of incomplete cache entry");
            return Ok(());
        }

        if let Some(redirect) = &self.redirect {
            return sink
                .redirect(&redirect.target, redirect.permanent)
                .map_err(CacheError::DeliveryFailed);
        }

        for (name, values) in &self.headers {
            sink.set_header(name, values);
        }

        let single_fragment = self.elements.len() == 1;
        for element in &self.elements {
            match element {
                Element::Bytes(bytes) => sink
                    .write(bytes, single_fragment)
                    .map_err(CacheError::DeliveryFailed)?,
                Element::Include { target, parameters } if parameters.is_empty() => {
                    dispatcher.include(target, request, sink)?;
                }
                Element::Include { target, parameters } => {
                    let previous = request.overlay_parameters(parameters);
                    let result = dispatcher.include(target, request, sink);
                    request.restore_parameters(previous);
                    result?;
                }
            }
        }
        Ok(())
    }
}

impl Cacheable for CacheEntry {
    fn cost(&self) -> usize {
        self.cost
    }

    fn on_removed(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(link) = self.link.get() else {
            return;
        };
        if let Some(registry) = link.registry.upgrade() {
            registry.detach(&link.key, self.id);
            trace!(key = %link.key, entry_id = %self.id, "Cache entry left its variation");
        }
    }
}

fn map_cost(map: &BTreeMap<String, Vec<String>>) -> usize {
    map.iter()
        .map(|(name, values)| name.len() + values.iter().map(String::len).sum::<usize>())
        .sum()
}
