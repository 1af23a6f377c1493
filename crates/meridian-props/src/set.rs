//! Property sets
//!
//! A [`PropertySet`] is a named bag of typed properties owned by one
//! task. Loading a set claims its scope in the property directory; the
//! handshake is strictly two-phase and the set sits in `Busy` until the
//! directory answers. Linking marks individual properties as subscribed
//! so value writes start flowing to the update forwarder.
//!
//! The set is sans-IO: operations that need the wire return the request
//! payload to send, and directory answers come back through the
//! `on_*_reply` methods.

use std::collections::{BTreeMap, BTreeSet};

use meridian_core::{PropertyValue, ResultCode};
use meridian_wire::ScopeRequest;
use tracing::{debug, warn};

/// Externally visible load state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetState {
    Unloaded,
    /// A load or unload handshake is outstanding
    Busy,
    Loaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

#[derive(Clone, Debug)]
struct Slot {
    value: PropertyValue,
    default: PropertyValue,
    linked: bool,
}

/// Completion report of a link round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkCompletion {
    pub result: ResultCode,
    pub missing: u16,
}

/// What a call to [`PropertySet::link_properties`] produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStart {
    /// The round could not start
    Refused(ResultCode),
    /// No confirmations were needed; the round is already over
    Complete(LinkCompletion),
    /// Confirmations are outstanding; completion comes back through
    /// [`PropertySet::confirm_link`]
    InFlight,
}

struct LinkRound {
    pending: BTreeSet<String>,
    retry: Vec<String>,
    missing: u16,
}

impl LinkRound {
    /// Completion requires both nothing in flight and nothing queued
    /// for retry
    fn completion(&self) -> Option<LinkCompletion> {
        if !self.pending.is_empty() || !self.retry.is_empty() {
            return None;
        }
        let result = if self.missing > 0 {
            ResultCode::MissingProperties
        } else {
            ResultCode::NoError
        };
        Some(LinkCompletion {
            result,
            missing: self.missing,
        })
    }
}

/// A named, loadable, linkable bag of properties
pub struct PropertySet {
    scope: String,
    properties: BTreeMap<String, Slot>,
    state: LoadState,
    link_round: Option<LinkRound>,
}

impl PropertySet {
    pub fn new(scope: impl Into<String>) -> Self {
        PropertySet {
            scope: scope.into(),
            properties: BTreeMap::new(),
            state: LoadState::Unloaded,
            link_round: None,
        }
    }

    /// Declare a property with its default value
    pub fn property(mut self, name: impl Into<String>, default: PropertyValue) -> Self {
        let slot = Slot {
            value: default.clone(),
            default,
            linked: false,
        };
        self.properties.insert(name.into(), slot);
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn state(&self) -> SetState {
        match self.state {
            LoadState::Unloaded => SetState::Unloaded,
            LoadState::Loading | LoadState::Unloading => SetState::Busy,
            LoadState::Loaded => SetState::Loaded,
        }
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn is_linked(&self, name: &str) -> bool {
        self.properties
            .get(name)
            .map(|slot| slot.linked)
            .unwrap_or(false)
    }

    pub fn links_in_flight(&self) -> bool {
        self.link_round.is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Begin loading: seed defaults and produce the scope-registration
    /// request. A second load without an unload in between answers
    /// `AlreadyLoaded` and sends nothing.
    pub fn load(&mut self) -> (ResultCode, Option<ScopeRequest>) {
        match self.state {
            LoadState::Loading | LoadState::Unloading => (ResultCode::Busy, None),
            LoadState::Loaded => (ResultCode::AlreadyLoaded, None),
            LoadState::Unloaded => {
                for slot in self.properties.values_mut() {
                    slot.value = slot.default.clone();
                    slot.linked = false;
                }
                self.state = LoadState::Loading;
                debug!(scope = %self.scope, "registering scope");
                (ResultCode::NoError, Some(ScopeRequest::new(&self.scope)))
            }
        }
    }

    /// Directory answer to the registration request
    pub fn on_register_reply(&mut self, result: ResultCode) -> ResultCode {
        if self.state != LoadState::Loading {
            warn!(scope = %self.scope, result = ?result, "unexpected register reply");
            return result;
        }
        if result.is_ok() {
            self.state = LoadState::Loaded;
            debug!(scope = %self.scope, "scope registered");
        } else {
            // Two-phase only: a refused registration is reported, never
            // silently retried.
            self.state = LoadState::Unloaded;
            warn!(scope = %self.scope, result = ?result, "scope registration refused");
        }
        result
    }

    /// Begin unloading: unlink everything and produce the unregister
    /// request
    pub fn unload(&mut self) -> (ResultCode, Option<ScopeRequest>) {
        match self.state {
            LoadState::Loading | LoadState::Unloading => (ResultCode::Busy, None),
            LoadState::Unloaded => (ResultCode::PropertySetGone, None),
            LoadState::Loaded => {
                if self.link_round.is_some() {
                    return (ResultCode::Busy, None);
                }
                for slot in self.properties.values_mut() {
                    slot.linked = false;
                }
                self.state = LoadState::Unloading;
                debug!(scope = %self.scope, "unregistering scope");
                (ResultCode::NoError, Some(ScopeRequest::new(&self.scope)))
            }
        }
    }

    /// Directory answer to the unregister request
    pub fn on_unregister_reply(&mut self, result: ResultCode) -> ResultCode {
        if self.state != LoadState::Unloading {
            warn!(scope = %self.scope, result = ?result, "unexpected unregister reply");
            return result;
        }
        self.state = LoadState::Unloaded;
        result
    }

    /// Start a link round over the named properties
    ///
    /// Each present property enters the round's pending set and must be
    /// confirmed through [`PropertySet::confirm_link`]; unknown names
    /// count into `missing`. Names that are already linked are
    /// satisfied on the spot.
    pub fn link_properties<S: AsRef<str>>(&mut self, names: &[S]) -> LinkStart {
        if self.state != LoadState::Loaded {
            return LinkStart::Refused(ResultCode::PropertySetGone);
        }
        if self.link_round.is_some() {
            return LinkStart::Refused(ResultCode::Busy);
        }

        let mut round = LinkRound {
            pending: BTreeSet::new(),
            retry: Vec::new(),
            missing: 0,
        };
        for name in names {
            let name = name.as_ref();
            match self.properties.get(name) {
                None => round.missing += 1,
                Some(slot) if slot.linked => {
                    debug!(scope = %self.scope, property = name, "already linked");
                }
                Some(_) => {
                    round.pending.insert(name.to_string());
                }
            }
        }

        match round.completion() {
            Some(completion) => LinkStart::Complete(completion),
            None => {
                self.link_round = Some(round);
                LinkStart::InFlight
            }
        }
    }

    /// Confirm or fail one pending link; a failed link joins the retry
    /// list. Returns the round's completion once nothing is in flight
    /// and nothing is left to retry.
    pub fn confirm_link(&mut self, name: &str, ok: bool) -> Option<LinkCompletion> {
        let round = self.link_round.as_mut()?;
        if !round.pending.remove(name) {
            warn!(scope = %self.scope, property = name, "confirm for a link that is not pending");
            return None;
        }
        if ok {
            if let Some(slot) = self.properties.get_mut(name) {
                slot.linked = true;
            }
        } else {
            round.retry.push(name.to_string());
        }

        let completion = round.completion();
        if completion.is_some() {
            self.link_round = None;
        }
        completion
    }

    /// Move the retry list back into the pending set and return the
    /// names to attempt again
    pub fn retry_links(&mut self) -> Vec<String> {
        let Some(round) = self.link_round.as_mut() else {
            return Vec::new();
        };
        let names = std::mem::take(&mut round.retry);
        for name in &names {
            round.pending.insert(name.clone());
        }
        names
    }

    /// Unlink the named properties
    ///
    /// Calling this while a link round is in flight is a programming
    /// error.
    pub fn unlink_properties<S: AsRef<str>>(&mut self, names: &[S]) {
        assert!(
            self.link_round.is_none(),
            "unlink_properties on {:?} while links are in flight",
            self.scope
        );
        for name in names {
            let name = name.as_ref();
            match self.properties.get_mut(name) {
                Some(slot) => slot.linked = false,
                None => debug!(scope = %self.scope, property = name, "unlink of unknown property"),
            }
        }
    }

    /// Write a value; returns the scope-qualified change record when
    /// the property is linked
    pub fn set_value(
        &mut self,
        name: &str,
        value: PropertyValue,
    ) -> Result<Option<(String, PropertyValue)>, ResultCode> {
        let scope = &self.scope;
        let Some(slot) = self.properties.get_mut(name) else {
            return Err(ResultCode::NotInSet);
        };
        slot.value = value.clone();
        if slot.linked {
            Ok(Some((format!("{}.{}", scope, name), value)))
        } else {
            Ok(None)
        }
    }

    pub fn get_value(&self, name: &str) -> Result<&PropertyValue, ResultCode> {
        self.properties
            .get(name)
            .map(|slot| &slot.value)
            .ok_or(ResultCode::NotInSet)
    }
}
