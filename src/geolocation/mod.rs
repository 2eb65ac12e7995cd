//! Source address geolocation
//!
//! The detection engine only needs a coarse country for each source
//! address. Resolution is best effort: every resolver degrades to an
//! "Unknown" location instead of failing, so a missing database or an
//! unroutable address never blocks a tick.
//!
//! The MaxMind-backed service needs a GeoLite2-City database downloaded
//! separately from MaxMind (free with registration).

use maxminddb::{geoip2, Reader};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::GeoConfig;
use crate::models::{LogEntry, UNKNOWN_COUNTRY};

/// Errors that can occur during geolocation lookups
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Failed to open database: {0}")]
    DatabaseOpen(#[from] maxminddb::MaxMindDBError),

    #[error("IP address not found in database")]
    NotFound,

    #[error("Country data missing for IP address")]
    NoCountry,

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Database file not found: {0}")]
    FileNotFound(String),
}

/// Coarse location of a source address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    pub country: String,
    pub city: Option<String>,
    pub flag: String,
}

impl GeoInfo {
    pub fn unknown() -> Self {
        GeoInfo {
            country: UNKNOWN_COUNTRY.to_string(),
            city: None,
            flag: UNKNOWN_FLAG.to_string(),
        }
    }

    pub fn new(country: impl Into<String>, iso_code: Option<&str>) -> Self {
        GeoInfo {
            country: country.into(),
            city: None,
            flag: iso_code.map(flag_for_iso).unwrap_or_else(|| UNKNOWN_FLAG.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        self.country != UNKNOWN_COUNTRY
    }

    /// Get a human-readable location string
    pub fn display_location(&self) -> String {
        match &self.city {
            Some(city) => format!("{} {}, {}", self.flag, city, self.country),
            None => format!("{} {}", self.flag, self.country),
        }
    }
}

const UNKNOWN_FLAG: &str = "\u{1F310}";

/// Regional-indicator flag for a two-letter ISO 3166-1 code
fn flag_for_iso(code: &str) -> String {
    let code = code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return UNKNOWN_FLAG.to_string();
    }
    code.to_ascii_uppercase()
        .chars()
        .filter_map(|c| char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32)))
        .collect()
}

/// Address to location boundary
///
/// Implementations must not fail: anything that cannot be resolved comes
/// back as [`GeoInfo::unknown`].
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, address: &str) -> GeoInfo;
}

impl<R: GeoResolver + ?Sized> GeoResolver for Arc<R> {
    fn resolve(&self, address: &str) -> GeoInfo {
        (**self).resolve(address)
    }
}

/// GeoIP lookup service using MaxMind GeoLite2-City database
///
/// # Example
///
/// ```ignore
/// use authwatch::geolocation::{GeoIpService, GeoResolver};
///
/// let service = GeoIpService::new("GeoLite2-City.mmdb")?;
/// println!("{}", service.resolve("8.8.8.8").display_location());
/// ```
pub struct GeoIpService {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoIpService {
    /// Create a new GeoIP service from a MaxMind database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, GeoError> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(GeoError::FileNotFound(path.display().to_string()));
        }

        let reader = Reader::open_readfile(path)?;
        Ok(GeoIpService {
            reader: Arc::new(reader),
        })
    }

    /// Look up the country and city of an IP address
    pub fn lookup(&self, ip: &IpAddr) -> Result<GeoInfo, GeoError> {
        let record: geoip2::City = self.reader.lookup(*ip).map_err(|e| match e {
            maxminddb::MaxMindDBError::AddressNotFoundError(_) => GeoError::NotFound,
            other => GeoError::DatabaseOpen(other),
        })?;

        let country = record.country.as_ref().ok_or(GeoError::NoCountry)?;
        let country_name = country
            .names
            .as_ref()
            .and_then(|n| n.get("en").copied())
            .ok_or(GeoError::NoCountry)?;
        let city_name = record
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en").copied())
            .map(String::from);

        let mut info = GeoInfo::new(country_name, country.iso_code);
        info.city = city_name;
        Ok(info)
    }
}

impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        GeoIpService {
            reader: Arc::clone(&self.reader),
        }
    }
}

impl GeoResolver for GeoIpService {
    fn resolve(&self, address: &str) -> GeoInfo {
        let result = IpAddr::from_str(address)
            .map_err(|_| GeoError::InvalidAddress(address.to_string()))
            .and_then(|ip| self.lookup(&ip));

        match result {
            Ok(info) => info,
            Err(e) => {
                log::debug!("Geo lookup for {} failed: {}", address, e);
                GeoInfo::unknown()
            }
        }
    }
}

/// Fixed address table with an optional fallback resolver
#[derive(Default)]
pub struct StaticGeoResolver {
    table: HashMap<String, GeoInfo>,
    fallback: Option<Arc<dyn GeoResolver>>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: Arc<dyn GeoResolver>) -> Self {
        StaticGeoResolver {
            table: HashMap::new(),
            fallback: Some(fallback),
        }
    }

    pub fn insert(&mut self, address: impl Into<String>, country: impl Into<String>) {
        self.table
            .insert(address.into(), GeoInfo::new(country, None));
    }
}

impl GeoResolver for StaticGeoResolver {
    fn resolve(&self, address: &str) -> GeoInfo {
        if let Some(info) = self.table.get(address) {
            return info.clone();
        }
        match &self.fallback {
            Some(fallback) => fallback.resolve(address),
            None => GeoInfo::unknown(),
        }
    }
}

/// Caches resolved locations across ticks
///
/// Only known locations are cached, so an address that failed to resolve
/// is retried on the next tick.
pub struct CachingGeoResolver<R> {
    inner: R,
    cache: Mutex<HashMap<String, GeoInfo>>,
}

impl<R: GeoResolver> CachingGeoResolver<R> {
    pub fn new(inner: R) -> Self {
        CachingGeoResolver {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<R: GeoResolver> GeoResolver for CachingGeoResolver<R> {
    fn resolve(&self, address: &str) -> GeoInfo {
        if let Some(info) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
        {
            return info.clone();
        }

        let info = self.inner.resolve(address);
        if info.is_known() {
            self.cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(address.to_string(), info.clone());
        }
        info
    }
}

/// Build the resolver chain described by the configuration
///
/// Overrides are consulted first, then the MaxMind database. Returns `None`
/// when neither is configured. A database that fails to open is logged and
/// skipped.
pub fn resolver_from_config(config: &GeoConfig) -> Option<Arc<dyn GeoResolver>> {
    let database: Option<Arc<dyn GeoResolver>> = match &config.database_path {
        Some(path) => match GeoIpService::new(path) {
            Ok(service) => {
                log::info!("Loaded GeoIP database {:?}", path);
                Some(Arc::new(service))
            }
            Err(e) => {
                log::warn!("GeoIP database unavailable, locations will be Unknown: {}", e);
                None
            }
        },
        None => None,
    };

    if database.is_none() && config.overrides.is_empty() {
        return None;
    }

    let mut table = match database {
        Some(db) => StaticGeoResolver::with_fallback(db),
        None => StaticGeoResolver::new(),
    };
    for (address, country) in &config.overrides {
        table.insert(address.clone(), country.clone());
    }

    if config.cache {
        Some(Arc::new(CachingGeoResolver::new(table)))
    } else {
        Some(Arc::new(table))
    }
}

/// Fill in the country of entries that have none
///
/// Each distinct address is resolved once per call. Entries that already
/// carry a country are returned unchanged.
pub fn enrich_entries(entries: &[LogEntry], resolver: &dyn GeoResolver) -> Vec<LogEntry> {
    let pending: BTreeSet<&str> = entries
        .iter()
        .filter(|e| e.needs_location())
        .map(|e| e.source_address.as_str())
        .collect();

    if pending.is_empty() {
        return entries.to_vec();
    }

    let resolved: HashMap<&str, GeoInfo> = pending
        .into_iter()
        .map(|address| (address, resolver.resolve(address)))
        .collect();

    for (address, info) in resolved.iter().filter(|(_, info)| info.is_known()) {
        log::debug!("{} located in {}", address, info.display_location());
    }
    let unresolved = resolved.values().filter(|info| !info.is_known()).count();
    if unresolved > 0 {
        log::debug!("{} address(es) could not be located", unresolved);
    }

    entries
        .iter()
        .map(|entry| match resolved.get(entry.source_address.as_str()) {
            Some(info) if entry.needs_location() && info.is_known() => {
                entry.clone().with_country(info.country.clone())
            }
            _ => entry.clone(),
        })
        .collect()
}
