//! lib/attributes/mod.rs
//!
//! This module contains the attribute store, the typed property bag carried by every API-facing
//! object of the library. An attribute is declared with a type, a shape (flavor) and a mode, and
//! every write goes through the coercion engine of the `convert` submodule. Adaptors can attach
//! per-attribute getter/setter hooks to synchronize a property with a live backend, an
//! object-level lister hook to materialize attributes on demand, and consumers can register
//! change callbacks.
//!
//! The store is guarded by a single lock and offers atomicity per call. Hooks and callbacks are
//! invoked outside the lock, under a per-attribute re-entrancy guard: while a hook for attribute
//! X runs, accesses to X triggered from inside the hook will not fire hooks again. Custom checks
//! registered with `add_check` run under the lock and must not call back into the store.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::error::Error;
use crate::misc;
use crate::PRIVATE_PREFIX;
use chrono::{DateTime, Utc};
use globset::GlobBuilder;
use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};


//------------------------------------------------------------------------------------------  MODULE


pub mod convert;

pub use convert::{coerce, to_type, AttributeType, AttributeValue, Flavor};


//------------------------------------------------------------------------------------------ STATICS


lazy_static! {
    // Deprecation notices are emitted once per process and alias.
    static ref DEPRECATION_NOTICES: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

// Alias chains longer than this are considered cyclic.
const MAX_ALIAS_HOPS: usize = 8;


//-------------------------------------------------------------------------------------------- TYPES


/// The write mode of an attribute. `Final` writes are silent no-ops, `ReadOnly` writes fail
/// unless forced, and `Alias` redirects every access to another attribute (the deprecation
/// mechanism).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Writeable,
    ReadOnly,
    Final,
    Alias(String),
}

/// Whether a callback was attached to or detached from an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerEvent {
    Added,
    Removed,
}

// Whether an access was initiated by the application (down, hooks fire) or by the adaptor
// pushing a backend-side update (up, hooks stay quiet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Down,
    Up,
}

/// Per-attribute getter hook, invoked before downward reads to refresh the value from the
/// backend. Returning `Ok(None)` leaves the stored value untouched.
pub type Getter = Arc<dyn Fn() -> Result<Option<AttributeValue>, Error> + Send + Sync>;
/// Per-attribute setter hook, invoked after downward writes with the original, un-coerced value.
pub type Setter = Arc<dyn Fn(Option<&AttributeValue>) -> Result<(), Error> + Send + Sync>;
/// Store-global getter hook, invoked with the attribute name.
pub type GlobalGetter =
    Arc<dyn Fn(&str) -> Result<Option<AttributeValue>, Error> + Send + Sync>;
/// Store-global setter hook, invoked with the attribute name and the original value.
pub type GlobalSetter =
    Arc<dyn Fn(&str, Option<&AttributeValue>) -> Result<(), Error> + Send + Sync>;
/// Object-level lister hook, invoked before `list` so the backend can materialize attributes
/// (typically through a clone of the store).
pub type Lister = Arc<dyn Fn() -> Result<(), Error> + Send + Sync>;
/// Object-level hook notified whenever a consumer adds or removes a callback, so backends can
/// subscribe to native change-notification channels.
pub type Caller = Arc<dyn Fn(&str, usize, CallerEvent) -> Result<(), Error> + Send + Sync>;
/// A change callback. Returning false deregisters the callback after this invocation.
pub type Callback = Arc<dyn Fn(&str, Option<&AttributeValue>) -> bool + Send + Sync>;
/// A custom validator, run on every write before the value is stored.
pub type Check = Arc<dyn Fn(&str, &AttributeValue) -> Result<(), Error> + Send + Sync>;


//---------------------------------------------------------------------------------------- ATTRIBUTE


// One declared attribute: its metadata, its hooks, and its current value. `exists` only becomes
// true once a value has been explicitly set; registration alone does not make the attribute
// visible in listings.
struct Attribute {
    display: String,
    typ: AttributeType,
    flavor: Flavor,
    mode: Mode,
    extended: bool,
    private: bool,
    enums: Vec<String>,
    checks: Vec<Check>,
    callbacks: Vec<(usize, Callback)>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    ttl: Option<chrono::Duration>,
    last: Option<DateTime<Utc>>,
    exists: bool,
    value: Option<AttributeValue>,
    default: Option<AttributeValue>,
}

impl Attribute {
    fn new(
        display: &str,
        typ: AttributeType,
        flavor: Flavor,
        mode: Mode,
        default: Option<AttributeValue>,
        extended: bool,
    ) -> Attribute {
        Attribute {
            display: display.trim().to_owned(),
            typ,
            flavor,
            mode,
            extended,
            private: display.trim().starts_with(PRIVATE_PREFIX),
            enums: Vec::new(),
            checks: Vec::new(),
            callbacks: Vec::new(),
            getter: None,
            setter: None,
            ttl: None,
            last: None,
            exists: false,
            value: None,
            default,
        }
    }
}


//-------------------------------------------------------------------------------------------- INNER


struct StoreInner {
    map: BTreeMap<String, Attribute>,
    extensible: bool,
    private_allowed: bool,
    global_getter: Option<GlobalGetter>,
    global_setter: Option<GlobalSetter>,
    lister: Option<Lister>,
    caller: Option<Caller>,
    next_cookie: usize,
    // Attributes whose hooks or callbacks are currently executing; accesses to them skip hook
    // invocation instead of recursing.
    guards: HashSet<String>,
    listing: bool,
}

impl StoreInner {
    // Resolves a public name to the canonical key of the attribute that actually holds the
    // value, following alias redirections.
    fn resolve(&self, name: &str) -> Result<String, Error> {
        let mut key = canonical(name);
        let mut hops = 0;
        while let Some(attr) = self.map.get(&key) {
            match &attr.mode {
                Mode::Alias(target) => {
                    let target_display = self
                        .map
                        .get(target)
                        .map(|a| a.display.clone())
                        .unwrap_or_else(|| target.clone());
                    deprecation_notice(&attr.display, &target_display);
                    key = target.clone();
                    hops += 1;
                    if hops > MAX_ALIAS_HOPS {
                        return Err(Error::BadParameter(format!(
                            "The attribute {} aliases form a cycle",
                            name
                        )));
                    }
                }
                _ => break,
            }
        }
        Ok(key)
    }
}

// Canonical form of an attribute name: the CamelCase public spelling and the under_score
// internal spelling of a name collapse to the same key, case-insensitively. Leading underscores
// are preserved since they mark private attributes.
fn canonical(name: &str) -> String {
    let trimmed = name.trim();
    let lead: String = trimmed.chars().take_while(|c| *c == '_').collect();
    let rest: String = trimmed
        .chars()
        .skip(lead.len())
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    format!("{}{}", lead, rest)
}

fn deprecation_notice(old: &str, new: &str) {
    if let Ok(mut seen) = DEPRECATION_NOTICES.lock() {
        if seen.insert(format!("{}->{}", old, new)) {
            warn!(
                "The attribute {} is deprecated, use {} instead",
                old, new
            );
        }
    }
}


//-------------------------------------------------------------------------------------------- STORE


/// A typed, extensible key/value store with per-attribute modes, coercion, callbacks and backend
/// synchronization hooks. Cloning the store yields another handle to the same backing map, which
/// is how hooks get to call back into it.
#[derive(Clone)]
pub struct AttributeStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for AttributeStore {
    fn default() -> AttributeStore {
        AttributeStore::new()
    }
}

impl AttributeStore {
    /// Creates a store that rejects writes to undeclared attributes (private-prefixed names are
    /// still allowed).
    pub fn new() -> AttributeStore {
        AttributeStore::with_flags(false, true)
    }

    /// Creates a store on which undeclared attributes are created on write.
    pub fn extensible() -> AttributeStore {
        AttributeStore::with_flags(true, true)
    }

    fn with_flags(extensible: bool, private_allowed: bool) -> AttributeStore {
        AttributeStore {
            inner: Arc::new(Mutex::new(StoreInner {
                map: BTreeMap::new(),
                extensible,
                private_allowed,
                global_getter: None,
                global_setter: None,
                lister: None,
                caller: None,
                next_cookie: 0,
                guards: HashSet::new(),
                listing: false,
            })),
        }
    }

    pub fn set_extensible(&self, extensible: bool) -> Result<(), Error> {
        misc::lock(&self.inner, "attribute store")?.extensible = extensible;
        Ok(())
    }

    pub fn allow_private(&self, allowed: bool) -> Result<(), Error> {
        misc::lock(&self.inner, "attribute store")?.private_allowed = allowed;
        Ok(())
    }

    //---------------------------------------------------------------------------- REGISTRATION

    /// Declares an attribute. Re-registering an existing name overwrites its metadata but
    /// preserves its current value, callbacks and hooks. An attribute declared `extended` is
    /// removable, like one created on the fly.
    pub fn register(
        &self,
        name: &str,
        default: Option<AttributeValue>,
        typ: AttributeType,
        flavor: Flavor,
        mode: Mode,
        extended: bool,
    ) -> Result<(), Error> {
        if let Mode::Alias(_) = mode {
            return Err(Error::BadParameter(format!(
                "The attribute {} cannot be registered as an alias, use register_deprecated",
                name
            )));
        }
        let mut inner = misc::lock(&self.inner, "attribute store")?;
        let key = inner.resolve(name)?;
        match inner.map.get_mut(&key) {
            Some(attr) => {
                attr.display = name.trim().to_owned();
                attr.typ = typ;
                attr.flavor = flavor;
                attr.mode = mode;
                attr.default = default;
                attr.extended = extended;
                attr.private = name.trim().starts_with(PRIVATE_PREFIX);
            }
            None => {
                let attr = Attribute::new(name, typ, flavor, mode, default, extended);
                inner.map.insert(key, attr);
            }
        }
        Ok(())
    }

    /// Declares `old_name` as a deprecated alias of the already-registered `new_name`. Every
    /// access through `old_name` transparently operates on `new_name` and logs a one-time
    /// notice.
    pub fn register_deprecated(&self, old_name: &str, new_name: &str) -> Result<(), Error> {
        let mut inner = misc::lock(&self.inner, "attribute store")?;
        let target = inner.resolve(new_name)?;
        if !inner.map.contains_key(&target) {
            return Err(Error::DoesNotExist(format!(
                "The attribute {} is not declared on this object",
                new_name
            )));
        }
        let key = canonical(old_name);
        let attr = Attribute::new(
            old_name,
            AttributeType::Any,
            Flavor::Any,
            Mode::Alias(target),
            None,
            false,
        );
        inner.map.insert(key, attr);
        Ok(())
    }

    /// Declares the allowed value set of an ENUM attribute. A `None` value always passes
    /// validation regardless of this set.
    pub fn set_enums(&self, name: &str, enums: Vec<String>) -> Result<(), Error> {
        self.with_attribute(name, |attr| {
            attr.enums = enums;
            Ok(())
        })
    }

    /// Attaches a custom validator run on every write. Checks run under the store lock and must
    /// not call back into the store.
    pub fn add_check(&self, name: &str, check: Check) -> Result<(), Error> {
        self.with_attribute(name, |attr| {
            attr.checks.push(check);
            Ok(())
        })
    }

    /// Attaches a per-attribute getter hook.
    pub fn register_getter(&self, name: &str, getter: Getter) -> Result<(), Error> {
        self.with_attribute(name, |attr| {
            attr.getter = Some(getter);
            Ok(())
        })
    }

    /// Attaches a per-attribute setter hook.
    pub fn register_setter(&self, name: &str, setter: Setter) -> Result<(), Error> {
        self.with_attribute(name, |attr| {
            attr.setter = Some(setter);
            Ok(())
        })
    }

    /// Sets the minimum interval before the getter hook is re-invoked to refresh the cached
    /// value. Without a ttl the getter runs on every downward read.
    pub fn set_ttl(&self, name: &str, ttl: std::time::Duration) -> Result<(), Error> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::BadParameter(format!("The ttl is out of range: {}", e)))?;
        self.with_attribute(name, |attr| {
            attr.ttl = Some(ttl);
            Ok(())
        })
    }

    pub fn set_global_getter(&self, getter: GlobalGetter) -> Result<(), Error> {
        misc::lock(&self.inner, "attribute store")?.global_getter = Some(getter);
        Ok(())
    }

    pub fn set_global_setter(&self, setter: GlobalSetter) -> Result<(), Error> {
        misc::lock(&self.inner, "attribute store")?.global_setter = Some(setter);
        Ok(())
    }

    pub fn set_lister(&self, lister: Lister) -> Result<(), Error> {
        misc::lock(&self.inner, "attribute store")?.lister = Some(lister);
        Ok(())
    }

    pub fn set_caller(&self, caller: Caller) -> Result<(), Error> {
        misc::lock(&self.inner, "attribute store")?.caller = Some(caller);
        Ok(())
    }

    // Applies a mutation to a declared attribute.
    fn with_attribute<F>(&self, name: &str, operation: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Attribute) -> Result<(), Error>,
    {
        let mut inner = misc::lock(&self.inner, "attribute store")?;
        let key = inner.resolve(name)?;
        match inner.map.get_mut(&key) {
            Some(attr) => operation(attr),
            None => Err(Error::DoesNotExist(format!(
                "The attribute {} is not declared on this object",
                name
            ))),
        }
    }

    //------------------------------------------------------------------------------ SET AND GET

    /// Sets an attribute from the application side: the value is coerced, checks run, and the
    /// setter hooks and callbacks fire. A `None` value resets the attribute to its registered
    /// default.
    pub fn set(&self, name: &str, value: Option<AttributeValue>) -> Result<(), Error> {
        self.set_with(name, value, false, Flow::Down)
    }

    /// Same as `set`, but overrides the READONLY mode (not FINAL) and auto-registers unknown
    /// names.
    pub fn set_force(&self, name: &str, value: Option<AttributeValue>) -> Result<(), Error> {
        self.set_with(name, value, true, Flow::Down)
    }

    /// Sets an attribute from the adaptor side: the backend already knows this value, so no
    /// hooks and no callbacks fire, and modes are overridden.
    pub fn set_internal(&self, name: &str, value: Option<AttributeValue>) -> Result<(), Error> {
        self.set_with(name, value, true, Flow::Up)
    }

    fn set_with(
        &self,
        name: &str,
        value: Option<AttributeValue>,
        force: bool,
        flow: Flow,
    ) -> Result<(), Error> {
        let mut inner = misc::lock(&self.inner, "attribute store")?;
        let key = inner.resolve(name)?;

        // Unknown names may be created on the fly depending on the store flags.
        if !inner.map.contains_key(&key) {
            let private = name.trim().starts_with(PRIVATE_PREFIX);
            if (private && inner.private_allowed) || inner.extensible {
                debug!("Auto-registering extended attribute {}", name);
                let attr =
                    Attribute::new(name, AttributeType::Any, Flavor::Any, Mode::Writeable, None, true);
                inner.map.insert(key.clone(), attr);
            } else if force {
                let attr = Attribute::new(
                    name,
                    AttributeType::Any,
                    Flavor::Scalar,
                    Mode::Writeable,
                    None,
                    true,
                );
                inner.map.insert(key.clone(), attr);
            } else {
                return Err(Error::DoesNotExist(format!(
                    "The attribute {} is not declared on this object",
                    name
                )));
            }
        }

        let (typ, flavor, default, enums, checks, display) = {
            let attr = known(&inner, &key)?;
            match &attr.mode {
                // Final writes are deliberately silent no-ops.
                Mode::Final => return Ok(()),
                Mode::ReadOnly if !force => {
                    return Err(Error::BadParameter(format!(
                        "The attribute {} is read only",
                        attr.display
                    )))
                }
                _ => {}
            }
            (
                attr.typ,
                attr.flavor,
                attr.default.clone(),
                attr.enums.clone(),
                attr.checks.clone(),
                attr.display.clone(),
            )
        };

        let coerced = match value.clone() {
            None => default,
            Some(v) => coerce(v, typ, flavor)?,
        };

        if typ == AttributeType::Enum {
            validate_enum(&display, coerced.as_ref(), &enums)?;
        }
        if let Some(v) = coerced.as_ref() {
            for check in checks.iter() {
                check(&display, v)?;
            }
        }

        {
            let attr = known_mut(&mut inner, &key)?;
            attr.value = coerced.clone();
            attr.exists = true;
            attr.last = Some(Utc::now());
        }

        // Upward writes and re-entrant writes do not fire hooks.
        if flow == Flow::Up || inner.guards.contains(&key) {
            return Ok(());
        }

        let global_setter = inner.global_setter.clone();
        let (setter, callbacks) = {
            let attr = known(&inner, &key)?;
            (attr.setter.clone(), attr.callbacks.clone())
        };
        inner.guards.insert(key.clone());
        drop(inner);
        let mut release = GuardRelease::new(self, key.clone());

        // The setter hooks receive the original, un-coerced value.
        let hook_result = invoke_setter_hooks(global_setter, setter, &display, value.as_ref());

        let mut dead = Vec::new();
        if hook_result.is_ok() {
            for (cookie, callback) in callbacks.iter() {
                if !callback(&display, coerced.as_ref()) {
                    dead.push(*cookie);
                }
            }
        }

        let mut inner = misc::lock(&self.inner, "attribute store")?;
        release.lift(&mut inner);
        if let Some(attr) = inner.map.get_mut(&key) {
            attr.callbacks.retain(|(cookie, _)| !dead.contains(cookie));
        }
        hook_result
    }

    /// Gets an attribute from the application side, refreshing it through the getter hooks first
    /// unless a ttl declares the cached value fresh enough. Returns the registered default when
    /// the attribute was never set.
    pub fn get(&self, name: &str) -> Result<Option<AttributeValue>, Error> {
        self.get_with(name, Flow::Down)
    }

    /// Gets the stored value without triggering any backend refresh.
    pub fn get_internal(&self, name: &str) -> Result<Option<AttributeValue>, Error> {
        self.get_with(name, Flow::Up)
    }

    fn get_with(&self, name: &str, flow: Flow) -> Result<Option<AttributeValue>, Error> {
        let mut inner = misc::lock(&self.inner, "attribute store")?;
        let key = inner.resolve(name)?;
        let (display, typ, flavor, stale) = {
            let attr = inner.map.get(&key).ok_or_else(|| {
                Error::DoesNotExist(format!(
                    "The attribute {} is not declared on this object",
                    name
                ))
            })?;
            let stale = match (attr.ttl, attr.last) {
                (Some(ttl), Some(last)) => Utc::now().signed_duration_since(last) >= ttl,
                _ => true,
            };
            (attr.display.clone(), attr.typ, attr.flavor, stale)
        };

        let global_getter = inner.global_getter.clone();
        let getter = inner.map.get(&key).and_then(|a| a.getter.clone());
        let fire = flow == Flow::Down
            && stale
            && !inner.guards.contains(&key)
            && (global_getter.is_some() || getter.is_some());

        if fire {
            inner.guards.insert(key.clone());
            drop(inner);
            let mut release = GuardRelease::new(self, key.clone());
            let refreshed = invoke_getter_hooks(global_getter, getter, &display);
            let mut reacquired = misc::lock(&self.inner, "attribute store")?;
            release.lift(&mut reacquired);
            if let Some(v) = refreshed? {
                let coerced = coerce(v, typ, flavor)?;
                if let Some(attr) = reacquired.map.get_mut(&key) {
                    attr.value = coerced;
                    attr.exists = true;
                    attr.last = Some(Utc::now());
                }
            }
            inner = reacquired;
        }

        let attr = known(&inner, &key)?;
        Ok(attr.value.clone().or_else(|| attr.default.clone()))
    }

    //------------------------------------------------------------------------ LIST FIND REMOVE

    /// Returns the names of all attributes that currently hold a value, invoking the lister hook
    /// first so the backend can materialize attributes on demand. Private attributes are not
    /// listed.
    pub fn list(&self) -> Result<Vec<String>, Error> {
        let lister = {
            let mut inner = misc::lock(&self.inner, "attribute store")?;
            if inner.listing {
                None
            } else {
                inner.listing = true;
                inner.lister.clone()
            }
        };
        if let Some(lister) = lister.as_ref() {
            let listed = lister();
            misc::lock(&self.inner, "attribute store")?.listing = false;
            listed?;
        }
        let inner = misc::lock(&self.inner, "attribute store")?;
        Ok(inner
            .map
            .values()
            .filter(|a| a.exists && !a.private && !matches!(a.mode, Mode::Alias(_)))
            .map(|a| a.display.clone())
            .collect())
    }

    /// Finds attributes whose name (and optionally whose string-rendered value) matches a
    /// `key_glob[=value_glob]` pattern with POSIX shell wildcard semantics.
    pub fn find(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let mut parts = pattern.splitn(2, '=');
        let key_glob = parts.next().unwrap_or("*");
        let value_glob = parts.next();

        let key_matcher = build_matcher(key_glob)?;
        let value_matcher = value_glob.map(|g| build_matcher(g)).transpose()?;

        let mut found = Vec::new();
        for name in self.list()? {
            if !key_matcher.is_match(&name) {
                continue;
            }
            match value_matcher.as_ref() {
                None => found.push(name),
                Some(matcher) => {
                    let value = self.get_internal(&name)?;
                    if let Some(v) = value {
                        if matcher.is_match(&v.to_string()) {
                            found.push(name);
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// Deletes a removable (writeable and extended) attribute entirely. Removed attributes
    /// disappear from listings and subsequent gets fail with `DoesNotExist`.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let mut inner = misc::lock(&self.inner, "attribute store")?;
        let key = inner.resolve(name)?;
        let removable = {
            let attr = inner.map.get(&key).ok_or_else(|| {
                Error::DoesNotExist(format!(
                    "The attribute {} is not declared on this object",
                    name
                ))
            })?;
            attr.extended && attr.mode == Mode::Writeable
        };
        if !removable {
            return Err(Error::BadParameter(format!(
                "The attribute {} is not removable",
                name
            )));
        }
        inner.map.remove(&key);
        Ok(())
    }

    /// Freezes the attribute at `value` (or at its current value), transitioning it to FINAL and
    /// firing callbacks exactly once regardless of whether the value changed.
    pub fn set_final(&self, name: &str, value: Option<AttributeValue>) -> Result<(), Error> {
        let frozen = match value {
            Some(v) => Some(v),
            None => {
                let inner = misc::lock(&self.inner, "attribute store")?;
                let key = inner.resolve(name)?;
                inner.map.get(&key).and_then(|a| a.value.clone())
            }
        };
        self.set_with(name, frozen, true, Flow::Down)?;
        self.with_attribute(name, |attr| {
            attr.mode = Mode::Final;
            Ok(())
        })
    }

    //------------------------------------------------------------------------------ PREDICATES

    /// Whether the attribute is known and currently holds a value.
    pub fn exists(&self, name: &str) -> Result<bool, Error> {
        let inner = misc::lock(&self.inner, "attribute store")?;
        let key = inner.resolve(name)?;
        Ok(inner.map.get(&key).map(|a| a.exists).unwrap_or(false))
    }

    pub fn is_readonly(&self, name: &str) -> Result<bool, Error> {
        self.peek(name, |attr| {
            matches!(attr.mode, Mode::ReadOnly | Mode::Final)
        })
    }

    pub fn is_writeable(&self, name: &str) -> Result<bool, Error> {
        self.peek(name, |attr| attr.mode == Mode::Writeable)
    }

    /// Writeable and created on the fly: only those attributes can be removed.
    pub fn is_removable(&self, name: &str) -> Result<bool, Error> {
        self.peek(name, |attr| attr.extended && attr.mode == Mode::Writeable)
    }

    pub fn is_vector(&self, name: &str) -> Result<bool, Error> {
        self.peek(name, |attr| attr.flavor == Flavor::Vector)
    }

    fn peek<F>(&self, name: &str, predicate: F) -> Result<bool, Error>
    where
        F: FnOnce(&Attribute) -> bool,
    {
        let inner = misc::lock(&self.inner, "attribute store")?;
        let key = inner.resolve(name)?;
        let attr = inner.map.get(&key).ok_or_else(|| {
            Error::DoesNotExist(format!(
                "The attribute {} is not declared on this object",
                name
            ))
        })?;
        Ok(predicate(attr))
    }

    //------------------------------------------------------------------------------- CALLBACKS

    /// Registers a change callback and returns its cookie. Callbacks fire in registration order
    /// on every write; a callback returning false is dropped after that invocation.
    pub fn add_callback(&self, name: &str, callback: Callback) -> Result<usize, Error> {
        let (cookie, caller, display) = {
            let mut inner = misc::lock(&self.inner, "attribute store")?;
            let key = inner.resolve(name)?;
            let cookie = inner.next_cookie;
            inner.next_cookie += 1;
            let caller = inner.caller.clone();
            let attr = inner.map.get_mut(&key).ok_or_else(|| {
                Error::DoesNotExist(format!(
                    "The attribute {} is not declared on this object",
                    name
                ))
            })?;
            attr.callbacks.push((cookie, callback));
            (cookie, caller, attr.display.clone())
        };
        if let Some(caller) = caller {
            caller(&display, cookie, CallerEvent::Added)?;
        }
        Ok(cookie)
    }

    /// Removes the callback with the given cookie, or all callbacks of the attribute when the
    /// cookie is `None`.
    pub fn remove_callback(&self, name: &str, cookie: Option<usize>) -> Result<(), Error> {
        let (removed, caller, display) = {
            let mut inner = misc::lock(&self.inner, "attribute store")?;
            let key = inner.resolve(name)?;
            let caller = inner.caller.clone();
            let attr = inner.map.get_mut(&key).ok_or_else(|| {
                Error::DoesNotExist(format!(
                    "The attribute {} is not declared on this object",
                    name
                ))
            })?;
            let mut removed = Vec::new();
            attr.callbacks.retain(|(c, _)| match cookie {
                Some(wanted) if *c != wanted => true,
                _ => {
                    removed.push(*c);
                    false
                }
            });
            (removed, caller, attr.display.clone())
        };
        if let Some(caller) = caller {
            for cookie in removed {
                caller(&display, cookie, CallerEvent::Removed)?;
            }
        }
        Ok(())
    }
}

// Lifts a re-entrancy guard once the hooks and callbacks behind it returned. The drop impl
// covers unwinds: a panicking user hook or callback must not leave the attribute guarded, or
// every later downward access would silently skip its hooks.
struct GuardRelease<'a> {
    store: &'a AttributeStore,
    key: Option<String>,
}

impl<'a> GuardRelease<'a> {
    fn new(store: &'a AttributeStore, key: String) -> GuardRelease<'a> {
        GuardRelease {
            store,
            key: Some(key),
        }
    }

    // Removes the guard through an already-held lock and disarms the drop impl. Must be called
    // before the lock goes out of scope, since dropping an armed release locks again.
    fn lift(&mut self, inner: &mut StoreInner) {
        if let Some(key) = self.key.take() {
            inner.guards.remove(&key);
        }
    }
}

impl Drop for GuardRelease<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Ok(mut inner) = self.store.inner.lock() {
                inner.guards.remove(&key);
            }
        }
    }
}

// Looks up an attribute that the current operation already made sure exists.
fn known<'a>(inner: &'a StoreInner, key: &str) -> Result<&'a Attribute, Error> {
    inner
        .map
        .get(key)
        .ok_or_else(|| Error::Generic(format!("The attribute {} vanished from the store", key)))
}

fn known_mut<'a>(inner: &'a mut StoreInner, key: &str) -> Result<&'a mut Attribute, Error> {
    inner
        .map
        .get_mut(key)
        .ok_or_else(|| Error::Generic(format!("The attribute {} vanished from the store", key)))
}

fn build_matcher(glob: &str) -> Result<globset::GlobMatcher, Error> {
    GlobBuilder::new(glob)
        .case_insensitive(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| Error::BadParameter(format!("The pattern {:?} is invalid: {}", glob, e)))
}

fn validate_enum(
    display: &str,
    value: Option<&AttributeValue>,
    enums: &[String],
) -> Result<(), Error> {
    // An empty enum set means the set was not configured yet; nothing to enforce.
    if enums.is_empty() {
        return Ok(());
    }
    let check_one = |v: &AttributeValue| -> Result<(), Error> {
        let rendered = v.to_string();
        if enums.iter().any(|e| e == &rendered) {
            Ok(())
        } else {
            Err(Error::BadParameter(format!(
                "The value {:?} is not in the enum set of {} ({:?})",
                rendered, display, enums
            )))
        }
    };
    match value {
        None => Ok(()),
        Some(AttributeValue::Vector(v)) => v.iter().try_for_each(check_one),
        Some(v) => check_one(v),
    }
}

fn invoke_setter_hooks(
    global: Option<GlobalSetter>,
    per_attribute: Option<Setter>,
    name: &str,
    original: Option<&AttributeValue>,
) -> Result<(), Error> {
    match (global, per_attribute) {
        (Some(global), Some(per)) => {
            let global_result = global(name, original);
            let per_result = per(original);
            // When both hooks are chained, one failure is tolerated as long as the other hook
            // succeeded.
            match (global_result, per_result) {
                (Ok(()), Ok(())) => Ok(()),
                (Err(e), Ok(())) => {
                    warn!("The global setter hook failed on {}: {}", name, e);
                    Ok(())
                }
                (Ok(()), Err(e)) => {
                    warn!("The setter hook failed on {}: {}", name, e);
                    Ok(())
                }
                (Err(_), Err(per_error)) => Err(per_error),
            }
        }
        (Some(global), None) => global(name, original),
        (None, Some(per)) => per(original),
        (None, None) => Ok(()),
    }
}

fn invoke_getter_hooks(
    global: Option<GlobalGetter>,
    per_attribute: Option<Getter>,
    name: &str,
) -> Result<Option<AttributeValue>, Error> {
    match (global, per_attribute) {
        (Some(global), Some(per)) => {
            let global_result = global(name);
            let per_result = per();
            match (global_result, per_result) {
                // The per-attribute hook sits closest to the backend, its value wins.
                (_, Ok(Some(v))) => Ok(Some(v)),
                (Ok(v), Ok(None)) => Ok(v),
                (Err(e), Ok(v)) => {
                    warn!("The global getter hook failed on {}: {}", name, e);
                    Ok(v)
                }
                (Ok(v), Err(e)) => {
                    warn!("The getter hook failed on {}: {}", name, e);
                    Ok(v)
                }
                (Err(_), Err(per_error)) => Err(per_error),
            }
        }
        (Some(global), None) => global(name),
        (None, Some(per)) => per(),
        (None, None) => Ok(None),
    }
}


//------------------------------------------------------------------------------------------- BEARER


/// The named-method attribute surface gained by any API object embedding an `AttributeStore`.
pub trait AttributesBearer {
    fn attribute_store(&self) -> &AttributeStore;

    fn set_attribute(&self, name: &str, value: Option<AttributeValue>) -> Result<(), Error> {
        self.attribute_store().set(name, value)
    }

    fn get_attribute(&self, name: &str) -> Result<Option<AttributeValue>, Error> {
        self.attribute_store().get(name)
    }

    fn list_attributes(&self) -> Result<Vec<String>, Error> {
        self.attribute_store().list()
    }

    fn find_attributes(&self, pattern: &str) -> Result<Vec<String>, Error> {
        self.attribute_store().find(pattern)
    }

    fn attribute_exists(&self, name: &str) -> Result<bool, Error> {
        self.attribute_store().exists(name)
    }

    fn attribute_is_readonly(&self, name: &str) -> Result<bool, Error> {
        self.attribute_store().is_readonly(name)
    }

    fn attribute_is_writeable(&self, name: &str) -> Result<bool, Error> {
        self.attribute_store().is_writeable(name)
    }

    fn attribute_is_removable(&self, name: &str) -> Result<bool, Error> {
        self.attribute_store().is_removable(name)
    }

    fn attribute_is_vector(&self, name: &str) -> Result<bool, Error> {
        self.attribute_store().is_vector(name)
    }

    fn add_attribute_callback(&self, name: &str, callback: Callback) -> Result<usize, Error> {
        self.attribute_store().add_callback(name, callback)
    }

    fn remove_attribute_callback(&self, name: &str, cookie: Option<usize>) -> Result<(), Error> {
        self.attribute_store().remove_callback(name, cookie)
    }
}


//-------------------------------------------------------------------------------------------- TESTS


#[cfg(test)]
mod tests {

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn int_store(name: &str) -> AttributeStore {
        let store = AttributeStore::new();
        store
            .register(
                name,
                Some(AttributeValue::Int(0)),
                AttributeType::Int,
                Flavor::Scalar,
                Mode::Writeable,
                false,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_roundtrip_with_coercion() {
        let store = int_store("Size");
        store.set("Size", Some("42".into())).unwrap();
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(42)));
        // Setting back what was read changes nothing.
        let read = store.get("Size").unwrap();
        store.set("Size", read.clone()).unwrap();
        assert_eq!(store.get("Size").unwrap(), read);
    }

    #[test]
    fn test_default_returned_until_set() {
        let store = int_store("Size");
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(0)));
        assert!(!store.exists("Size").unwrap());
        store.set("Size", Some(AttributeValue::Int(3))).unwrap();
        assert!(store.exists("Size").unwrap());
        // None resets to the default.
        store.set("Size", None).unwrap();
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(0)));
    }

    #[test]
    fn test_name_spellings_collapse() {
        let store = AttributeStore::new();
        store
            .register(
                "JobId",
                None,
                AttributeType::String,
                Flavor::Scalar,
                Mode::Writeable,
                false,
            )
            .unwrap();
        store.set("job_id", Some("17".into())).unwrap();
        assert_eq!(
            store.get("JOBID").unwrap(),
            Some(AttributeValue::String("17".to_owned()))
        );
    }

    #[test]
    fn test_extensibility_gating() {
        let closed = AttributeStore::new();
        match closed.set("Unknown", Some("x".into())) {
            Err(Error::DoesNotExist(_)) => {}
            other => panic!("expected DoesNotExist, got {:?}", other),
        }
        // Private names pass even on a closed store.
        closed.set("_hidden", Some("x".into())).unwrap();
        assert!(!closed.list().unwrap().contains(&"_hidden".to_owned()));

        let open = AttributeStore::extensible();
        open.set("Unknown", Some("x".into())).unwrap();
        assert!(open.is_removable("Unknown").unwrap());
        assert_eq!(open.list().unwrap(), vec!["Unknown".to_owned()]);
    }

    #[test]
    fn test_mode_enforcement() {
        let store = AttributeStore::new();
        store
            .register(
                "State",
                None,
                AttributeType::String,
                Flavor::Scalar,
                Mode::ReadOnly,
                false,
            )
            .unwrap();
        match store.set("State", Some("Running".into())) {
            Err(Error::BadParameter(_)) => {}
            other => panic!("expected BadParameter, got {:?}", other),
        }
        // Force writes override READONLY.
        store.set_force("State", Some("Running".into())).unwrap();
        assert_eq!(
            store.get("State").unwrap(),
            Some(AttributeValue::String("Running".to_owned()))
        );
        // FINAL writes are silent no-ops, even forced.
        store.set_final("State", None).unwrap();
        store.set_force("State", Some("Done".into())).unwrap();
        assert_eq!(
            store.get("State").unwrap(),
            Some(AttributeValue::String("Running".to_owned()))
        );
    }

    #[test]
    fn test_alias_transparency() {
        let store = int_store("NewName");
        store.register_deprecated("OldName", "NewName").unwrap();
        store.set("OldName", Some(AttributeValue::Int(5))).unwrap();
        assert_eq!(store.get("NewName").unwrap(), Some(AttributeValue::Int(5)));
        store.set("NewName", Some(AttributeValue::Int(6))).unwrap();
        assert_eq!(store.get("OldName").unwrap(), Some(AttributeValue::Int(6)));
        // The alias never shows up as a distinct entry.
        assert_eq!(store.list().unwrap(), vec!["NewName".to_owned()]);
    }

    #[test]
    fn test_enum_validation() {
        let store = AttributeStore::new();
        store
            .register(
                "Flavor",
                None,
                AttributeType::Enum,
                Flavor::Scalar,
                Mode::Writeable,
                false,
            )
            .unwrap();
        store
            .set_enums("Flavor", vec!["A".to_owned(), "B".to_owned()])
            .unwrap();
        store.set("Flavor", Some("A".into())).unwrap();
        match store.set("Flavor", Some("C".into())) {
            Err(Error::BadParameter(_)) => {}
            other => panic!("expected BadParameter, got {:?}", other),
        }
        // None always passes.
        store.set("Flavor", None).unwrap();
    }

    #[test]
    fn test_vector_coercion() {
        let store = AttributeStore::new();
        store
            .register(
                "Sizes",
                None,
                AttributeType::Int,
                Flavor::Vector,
                Mode::Writeable,
                false,
            )
            .unwrap();
        store.set("Sizes", Some("1 2 3".into())).unwrap();
        assert_eq!(
            store.get("Sizes").unwrap(),
            Some(AttributeValue::Vector(vec![
                AttributeValue::Int(1),
                AttributeValue::Int(2),
                AttributeValue::Int(3)
            ]))
        );
        store.set("Sizes", Some(AttributeValue::Int(5))).unwrap();
        assert_eq!(
            store.get("Sizes").unwrap(),
            Some(AttributeValue::Vector(vec![AttributeValue::Int(5)]))
        );
        assert!(store.is_vector("Sizes").unwrap());
    }

    #[test]
    fn test_callback_lifecycle() {
        let store = int_store("Size");
        let once = Arc::new(AtomicUsize::new(0));
        let every = Arc::new(AtomicUsize::new(0));
        let once_counter = once.clone();
        store
            .add_callback(
                "Size",
                Arc::new(move |_, _| {
                    once_counter.fetch_add(1, Ordering::SeqCst);
                    false
                }),
            )
            .unwrap();
        let every_counter = every.clone();
        store
            .add_callback(
                "Size",
                Arc::new(move |_, _| {
                    every_counter.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            )
            .unwrap();
        for i in 0..3 {
            store.set("Size", Some(AttributeValue::Int(i))).unwrap();
        }
        assert_eq!(once.load(Ordering::SeqCst), 1);
        assert_eq!(every.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_callback_by_cookie() {
        let store = int_store("Size");
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let cookie = store
            .add_callback(
                "Size",
                Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            )
            .unwrap();
        store.set("Size", Some(AttributeValue::Int(1))).unwrap();
        store.remove_callback("Size", Some(cookie)).unwrap();
        store.set("Size", Some(AttributeValue::Int(2))).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_caller_hook_sees_registration() {
        let store = int_store("Size");
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        store
            .set_caller(Arc::new(move |name, cookie, event| {
                sink.lock().unwrap().push((name.to_owned(), cookie, event));
                Ok(())
            }))
            .unwrap();
        let cookie = store.add_callback("Size", Arc::new(|_, _| true)).unwrap();
        store.remove_callback("Size", None).unwrap();
        let seen = events.lock().unwrap();
        assert_eq!(seen[0], ("Size".to_owned(), cookie, CallerEvent::Added));
        assert_eq!(seen[1], ("Size".to_owned(), cookie, CallerEvent::Removed));
    }

    #[test]
    fn test_custom_check_aborts_set() {
        let store = int_store("Size");
        store
            .add_check(
                "Size",
                Arc::new(|name, value| match value {
                    AttributeValue::Int(i) if *i < 0 => Err(Error::BadParameter(format!(
                        "The attribute {} cannot be negative",
                        name
                    ))),
                    _ => Ok(()),
                }),
            )
            .unwrap();
        store.set("Size", Some(AttributeValue::Int(1))).unwrap();
        assert!(store.set("Size", Some(AttributeValue::Int(-1))).is_err());
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(1)));
    }

    #[test]
    fn test_getter_hook_refreshes() {
        let store = int_store("Size");
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        store
            .register_getter(
                "Size",
                Arc::new(move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(Some(AttributeValue::Int(n as i64)))
                }),
            )
            .unwrap();
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(1)));
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(2)));
        // Internal reads never hit the backend.
        assert_eq!(store.get_internal("Size").unwrap(), Some(AttributeValue::Int(2)));
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ttl_throttles_getter() {
        let store = int_store("Size");
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        store
            .register_getter(
                "Size",
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(AttributeValue::Int(7)))
                }),
            )
            .unwrap();
        store.set_ttl("Size", std::time::Duration::from_secs(3600)).unwrap();
        store.get("Size").unwrap();
        store.get("Size").unwrap();
        store.get("Size").unwrap();
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_setter_hook_sees_original_value() {
        let store = int_store("Size");
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        store
            .register_setter(
                "Size",
                Arc::new(move |original| {
                    *sink.lock().unwrap() = original.cloned();
                    Ok(())
                }),
            )
            .unwrap();
        store.set("Size", Some("42".into())).unwrap();
        // The hook received the string, not the coerced int.
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(AttributeValue::String("42".to_owned()))
        );
        // Upward writes do not fire the hook.
        store.set_internal("Size", Some(AttributeValue::Int(8))).unwrap();
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(AttributeValue::String("42".to_owned()))
        );
    }

    #[test]
    fn test_double_hook_tolerance() {
        let store = int_store("Size");
        store
            .set_global_setter(Arc::new(|name, _| {
                Err(Error::Generic(format!("global hook down for {}", name)))
            }))
            .unwrap();
        store.register_setter("Size", Arc::new(|_| Ok(()))).unwrap();
        // One failing hook out of two is swallowed.
        store.set("Size", Some(AttributeValue::Int(1))).unwrap();
        // Both failing propagates.
        store
            .register_setter("Size", Arc::new(|_| Err(Error::Generic("down too".into()))))
            .unwrap();
        assert!(store.set("Size", Some(AttributeValue::Int(2))).is_err());
    }

    #[test]
    fn test_reentrant_hook_does_not_recurse() {
        let store = AttributeStore::extensible();
        store
            .register(
                "Size",
                None,
                AttributeType::Int,
                Flavor::Scalar,
                Mode::Writeable,
                false,
            )
            .unwrap();
        let inner = store.clone();
        let depth = Arc::new(AtomicUsize::new(0));
        let counter = depth.clone();
        store
            .register_setter(
                "Size",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // A hook writing its own attribute must not recurse into itself.
                    inner.set("Size", Some(AttributeValue::Int(99)))
                }),
            )
            .unwrap();
        store.set("Size", Some(AttributeValue::Int(1))).unwrap();
        assert_eq!(depth.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_internal("Size").unwrap(), Some(AttributeValue::Int(99)));
    }

    #[test]
    fn test_lister_materializes_attributes() {
        let store = AttributeStore::extensible();
        let backend = store.clone();
        store
            .set_lister(Arc::new(move || {
                backend.set_internal("Discovered", Some("yes".into()))
            }))
            .unwrap();
        assert_eq!(store.list().unwrap(), vec!["Discovered".to_owned()]);
    }

    #[test]
    fn test_find_patterns() {
        let store = AttributeStore::extensible();
        store.set("JobOne", Some("running".into())).unwrap();
        store.set("JobTwo", Some("done".into())).unwrap();
        store.set("Name", Some("test".into())).unwrap();
        let mut jobs = store.find("Job*").unwrap();
        jobs.sort();
        assert_eq!(jobs, vec!["JobOne".to_owned(), "JobTwo".to_owned()]);
        assert_eq!(store.find("Job*=done").unwrap(), vec!["JobTwo".to_owned()]);
        assert_eq!(store.find("Job?ne=r[!x]nning").unwrap(), vec!["JobOne".to_owned()]);
        assert_eq!(
            store.find("{JobOne,Name}").unwrap().len(),
            2
        );
    }

    #[test]
    fn test_remove_semantics() {
        let store = AttributeStore::extensible();
        store.set("Scratch", Some("x".into())).unwrap();
        store.remove("Scratch").unwrap();
        match store.get("Scratch") {
            Err(Error::DoesNotExist(_)) => {}
            other => panic!("expected DoesNotExist, got {:?}", other),
        }
        // Declared attributes are not removable.
        store
            .register(
                "Fixed",
                None,
                AttributeType::Int,
                Flavor::Scalar,
                Mode::Writeable,
                false,
            )
            .unwrap();
        assert!(store.remove("Fixed").is_err());
    }

    #[test]
    fn test_set_final_fires_callbacks_once() {
        let store = int_store("Size");
        store.set("Size", Some(AttributeValue::Int(5))).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        store
            .add_callback(
                "Size",
                Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            )
            .unwrap();
        // Freezing at the current value still notifies exactly once.
        store.set_final("Size", None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        store.set("Size", Some(AttributeValue::Int(9))).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(5)));
    }

    #[test]
    fn test_reregistration_preserves_value() {
        let store = int_store("Size");
        store.set("Size", Some(AttributeValue::Int(4))).unwrap();
        store
            .register(
                "Size",
                Some(AttributeValue::Int(1)),
                AttributeType::Int,
                Flavor::Scalar,
                Mode::ReadOnly,
                false,
            )
            .unwrap();
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(4)));
        assert!(store.is_readonly("Size").unwrap());
    }

    #[test]
    fn test_panicking_callback_lifts_guard() {
        let store = int_store("Size");
        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = hooked.clone();
        store
            .register_setter(
                "Size",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        let cookie = store
            .add_callback("Size", Arc::new(|_, _| panic!("callback blew up")))
            .unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.set("Size", Some(AttributeValue::Int(1)))
        }));
        assert!(outcome.is_err());
        // The attribute must not stay guarded: once the culprit is removed, hooks fire again.
        store.remove_callback("Size", Some(cookie)).unwrap();
        store.set("Size", Some(AttributeValue::Int(2))).unwrap();
        assert_eq!(hooked.load(Ordering::SeqCst), 2);
        assert_eq!(store.get_internal("Size").unwrap(), Some(AttributeValue::Int(2)));
    }

    #[test]
    fn test_panicking_getter_hook_lifts_guard() {
        let store = int_store("Size");
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        store
            .register_getter(
                "Size",
                Arc::new(move || {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("backend blew up");
                    }
                    Ok(Some(AttributeValue::Int(3)))
                }),
            )
            .unwrap();
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.get("Size")));
        assert!(outcome.is_err());
        assert_eq!(store.get("Size").unwrap(), Some(AttributeValue::Int(3)));
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    struct Job {
        attributes: AttributeStore,
    }

    impl AttributesBearer for Job {
        fn attribute_store(&self) -> &AttributeStore {
            &self.attributes
        }
    }

    #[test]
    fn test_bearer_end_to_end() {
        let job = Job {
            attributes: AttributeStore::new(),
        };
        job.attributes
            .register(
                "Size",
                Some(AttributeValue::Int(0)),
                AttributeType::Int,
                Flavor::Scalar,
                Mode::Writeable,
                false,
            )
            .unwrap();
        job.set_attribute("Size", Some("42".into())).unwrap();
        assert_eq!(
            job.get_attribute("Size").unwrap(),
            Some(AttributeValue::Int(42))
        );
        assert_eq!(job.list_attributes().unwrap(), vec!["Size".to_owned()]);
    }
}
