// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Bounded slotted container of live processor instances. See [`ProcRegistry`] for
//! the locking discipline and the substitution operation.

use crate::{FairMutex, Frame, KEY_FORCED_PROC_ID, KEY_PROC_NAME, KEY_SETTINGS,
            ProcCatalog, ProcError, ProcInstance, ProcResult, Settings};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Hard upper bound on the number of slots a registry can be opened with.
pub const REGISTRY_MAX_SLOTS: usize = 8192;

/// Capacity of each direction's queue for instances created through the registry.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2;

/// Default URL prefix used in generated representations.
pub const DEFAULT_PREFIX: &str = "procs";

/// Key of the integer handle in create replies and enumeration entries.
pub const KEY_PROC_ID: &str = "proc_id";

/// One cell of the slot table. The cell pointer is only ever swapped while **both**
/// direction gates are held, so an I/O thread holding one gate reads a stable
/// occupant for the duration of its forwarded call.
#[derive(Debug)]
struct RegistrySlot {
    /// Serializes control operations targeting this slot; also what keeps an
    /// instance alive across the double-lock handoff (deletion needs this mutex).
    ctl: Mutex<()>,
    input_gate: FairMutex,
    output_gate: FairMutex,
    cell: Mutex<Option<Arc<ProcInstance>>>,
}

impl RegistrySlot {
    fn new() -> Self {
        Self {
            ctl: Mutex::new(()),
            input_gate: FairMutex::new(),
            output_gate: FairMutex::new(),
            cell: Mutex::new(None),
        }
    }

    fn lock_ctl(&self) -> MutexGuard<'_, ()> {
        self.ctl.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn occupant(&self) -> Option<Arc<ProcInstance>> {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_free(&self) -> bool {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Caller must hold the ctl mutex and both gates.
    fn swap(&self, replacement: Option<Arc<ProcInstance>>) -> Option<Arc<ProcInstance>> {
        let mut cell = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *cell, replacement)
    }
}

/// Filter accepted by [`ProcRegistry::enumerate`]: `proc_name==X` keeps matching
/// entries, `proc_name!=X` keeps the rest. Names compare by full equality.
#[derive(Debug, PartialEq, Eq)]
enum NameFilter {
    Equals(String),
    Differs(String),
}

impl NameFilter {
    fn parse(raw: &str) -> ProcResult<Self> {
        if let Some(name) = raw.strip_prefix("proc_name==") {
            return Ok(Self::Equals(name.to_owned()));
        }
        if let Some(name) = raw.strip_prefix("proc_name!=") {
            return Ok(Self::Differs(name.to_owned()));
        }
        Err(ProcError::Invalid)
    }

    fn keeps(&self, name: &str) -> bool {
        match self {
            Self::Equals(wanted) => name == wanted,
            Self::Differs(unwanted) => name != unwanted,
        }
    }
}

/// A bounded table of live processors that serves fast concurrent frame I/O against
/// its slots while create/delete/substitute operations proceed against the same
/// population.
///
/// # Locking discipline
///
/// Two layers, by design (a single read-write lock would serialize I/O across all
/// slots, and a concurrent map cannot give substitution an atomic swap with respect
/// to I/O on the *same* handle):
///
/// - the **registry mutex** guards the table - every create/delete/enumerate holds
///   it, and per-instance verbs hold it only long enough to pin the slot;
/// - each slot's **two fair gates** order I/O against slot mutation. The I/O path
///   takes one gate and never touches the registry mutex; mutation takes both gates
///   to swap the cell. Fairness is what keeps a substituting thread live under a
///   stream of I/O requests.
///
/// Per-instance control verbs use a double-lock handoff: pin the slot under the
/// registry mutex, then release it and operate holding only the slot's ctl mutex -
/// deletion needs that same mutex, so the occupant cannot be torn down mid-verb.
///
/// A slot's integer index is its occupant's handle, and it is stable for the
/// processor's whole life - including across type substitution. I/O on an empty slot
/// is a well-defined [`ProcError::NotFound`] miss.
#[derive(Debug)]
pub struct ProcRegistry {
    catalog: Arc<ProcCatalog>,
    api_lock: Mutex<()>,
    slots: Box<[RegistrySlot]>,
    prefix: String,
    href: Option<String>,
}

impl ProcRegistry {
    /// Opens a registry with `max_slots` slots against the given type catalog.
    /// `prefix` defaults to [`DEFAULT_PREFIX`]; `href` (when given) prefixes the
    /// self-links in enumeration output.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] when `max_slots` is zero or exceeds
    /// [`REGISTRY_MAX_SLOTS`].
    pub fn open(
        catalog: Arc<ProcCatalog>,
        max_slots: usize,
        prefix: Option<&str>,
        href: Option<&str>,
    ) -> ProcResult<Self> {
        if max_slots == 0 || max_slots > REGISTRY_MAX_SLOTS {
            return Err(ProcError::Invalid);
        }
        let slots: Box<[RegistrySlot]> =
            (0..max_slots).map(|_| RegistrySlot::new()).collect();
        Ok(Self {
            catalog,
            api_lock: Mutex::new(()),
            slots,
            prefix: prefix.unwrap_or(DEFAULT_PREFIX).to_owned(),
            href: href.map(ToOwned::to_owned),
        })
    }

    #[must_use]
    pub fn slot_count(&self) -> usize { self.slots.len() }

    /// Tears down every occupied slot. Also runs on drop; explicit calls make
    /// shutdown ordering visible at the call site.
    pub fn close(&self) {
        let _api = self.lock_api();
        for index in 0..self.slots.len() {
            let _unused = self.unregister_slot(index);
        }
    }

    /// Producer I/O verb. Holds the slot's input gate across the forwarded call so a
    /// concurrent delete/substitute cannot tear the instance down mid-send. No
    /// registry-level mutex is touched.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] for an out-of-range handle; [`ProcError::NotFound`]
    /// for an empty slot; otherwise the instance's status.
    pub fn send_frame(&self, proc_id: usize, frame: &Frame) -> ProcResult<()> {
        let slot = self.slots.get(proc_id).ok_or(ProcError::Invalid)?;
        let _gate = slot.input_gate.lock();
        let instance = slot.occupant().ok_or(ProcError::NotFound)?;
        instance.send_frame(frame)
    }

    /// Consumer I/O verb; mirror of [`Self::send_frame`] on the output gate.
    ///
    /// # Errors
    ///
    /// As [`Self::send_frame`].
    pub fn recv_frame(&self, proc_id: usize) -> ProcResult<Frame> {
        let slot = self.slots.get(proc_id).ok_or(ProcError::Invalid)?;
        let _gate = slot.output_gate.lock();
        let instance = slot.occupant().ok_or(ProcError::NotFound)?;
        instance.recv_frame()
    }

    /// Instantiates a processor of type `type_name` (POST). The settings payload may
    /// carry `forced_proc_id` to request a specific slot; otherwise the first free
    /// slot is taken. Returns the slot index, which is the new processor's handle -
    /// reply shape `{"proc_id": n}` is one [`KEY_PROC_ID`] insertion away.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] for malformed settings or an out-of-range
    /// `forced_proc_id`; [`ProcError::Conflict`] when the forced slot is occupied;
    /// [`ProcError::NotFound`] for an unknown type; [`ProcError::OutOfMemory`] when
    /// no slot is free; or the instance-open failure.
    pub fn create(&self, type_name: &str, settings_str: &str) -> ProcResult<usize> {
        let _api = self.lock_api();
        let settings = Settings::parse(settings_str)?;

        let slot_index = if settings.contains_key(KEY_FORCED_PROC_ID) {
            let forced = settings
                .get_u64(KEY_FORCED_PROC_ID)
                .and_then(|value| usize::try_from(value).ok())
                .ok_or(ProcError::Invalid)?;
            if forced >= self.slots.len() {
                return Err(ProcError::Invalid);
            }
            if !self.slots[forced].is_free() {
                return Err(ProcError::Conflict);
            }
            forced
        } else {
            self.slots
                .iter()
                .position(RegistrySlot::is_free)
                .ok_or(ProcError::OutOfMemory)?
        };

        let descriptor = self.catalog.find(type_name).ok_or(ProcError::NotFound)?;
        let instance = ProcInstance::open(
            &descriptor,
            settings_str,
            slot_index,
            [DEFAULT_QUEUE_CAPACITY; 2],
        )?;

        let slot = &self.slots[slot_index];
        {
            let _ctl = slot.lock_ctl();
            let _input = slot.input_gate.lock();
            let _output = slot.output_gate.lock();
            let _previous = slot.swap(Some(Arc::new(instance)));
        }

        tracing::debug!("created proc '{type_name}' on slot {slot_index}");
        Ok(slot_index)
    }

    /// Enumerates occupied slots (GET), optionally filtered. Shape:
    /// `{"<prefix>": [{"proc_id": n, "proc_name": s, "links": [{"rel": "self",
    /// "href": "<href>/<prefix>/<id>.json"}]}, …]}`.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] for an unparseable filter.
    pub fn enumerate(&self, filter: Option<&str>) -> ProcResult<Value> {
        let _api = self.lock_api();
        let filter = filter.map(NameFilter::parse).transpose()?;

        let mut entries = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(instance) = slot.occupant() else {
                continue;
            };
            let name = instance.name();
            if let Some(filter) = &filter
                && !filter.keeps(name)
            {
                continue;
            }
            let href = self.href.as_deref().unwrap_or_default();
            entries.push(json!({
                "proc_id": index,
                "proc_name": name,
                "links": [{
                    "rel": "self",
                    "href": format!("{href}/{}/{index}.json", self.prefix),
                }],
            }));
        }

        let mut top = Map::new();
        top.insert(self.prefix.clone(), Value::Array(entries));
        Ok(Value::Object(top))
    }

    /// Destroys the processor in `proc_id` (DELETE): wake anything blocked on its
    /// queues, then swap the cell to empty under the slot's ctl mutex and both
    /// gates, and only then close the instance - so I/O threads never observe a
    /// dangling occupant, only a miss.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] for an out-of-range handle; [`ProcError::NotFound`]
    /// for an empty slot.
    pub fn delete(&self, proc_id: usize) -> ProcResult<()> {
        let _api = self.lock_api();
        if proc_id >= self.slots.len() {
            return Err(ProcError::Invalid);
        }
        self.unregister_slot(proc_id)
    }

    /// Applies a settings payload to the processor in `proc_id` (PUT). When the
    /// payload's `proc_name` names a *different* registered type, this becomes
    /// **type substitution** (see [`Self::substitute`]); a `proc_name` equal to the
    /// current type - or absent - makes it a plain settings PUT.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] for an empty slot; [`ProcError::Invalid`] for an
    /// unknown substitute type or malformed payload; otherwise the type's status.
    pub fn put_settings(&self, proc_id: usize, settings_str: &str) -> ProcResult<()> {
        self.with_instance(proc_id, |slot, instance| {
            let settings = Settings::parse(settings_str)?;
            match settings.get_str(KEY_PROC_NAME) {
                Some(new_name) if new_name != instance.name() => {
                    let new_name = new_name.into_owned();
                    self.substitute(slot, &instance, &new_name, proc_id)
                }
                _ => instance.ctl_put(settings_str),
            }
        })
    }

    /// State tree of the processor in `proc_id` (GET): the instance's tree with
    /// `proc_name` inserted at the top of its `settings` sub-object.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] for an empty slot.
    pub fn get_state(&self, proc_id: usize) -> ProcResult<Value> {
        self.with_instance(proc_id, |_slot, instance| {
            let tree = instance.ctl_get()?;
            Ok(insert_proc_name(tree, instance.name()))
        })
    }

    /// Wakes every thread blocked on the processor in `proc_id`.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] for an empty slot.
    pub fn unblock(&self, proc_id: usize) -> ProcResult<()> {
        self.with_instance(proc_id, |_slot, instance| {
            instance.ctl_unblock();
            Ok(())
        })
    }

    /// Forwards a type-private control verb to the processor in `proc_id`.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] for an empty slot or an unhandled tag.
    pub fn opt(
        &self,
        proc_id: usize,
        tag: &str,
        arg: Option<&str>,
    ) -> ProcResult<Option<String>> {
        self.with_instance(proc_id, |_slot, instance| instance.ctl_opt(tag, arg))
    }

    /// The double-lock handoff shared by every per-instance verb: pin the slot under
    /// the registry mutex, read the occupant, then release the registry mutex and run
    /// `operation` holding only the slot's ctl mutex.
    fn with_instance<R>(
        &self,
        proc_id: usize,
        operation: impl FnOnce(&RegistrySlot, Arc<ProcInstance>) -> ProcResult<R>,
    ) -> ProcResult<R> {
        let api_guard = self.lock_api();
        let slot = self.slots.get(proc_id).ok_or(ProcError::Invalid)?;
        let ctl_guard = slot.lock_ctl();
        let instance = slot.occupant().ok_or(ProcError::NotFound)?;
        drop(api_guard);

        let result = operation(slot, instance);
        drop(ctl_guard);
        result
    }

    /// Replaces `old` with a freshly opened instance of `new_name` on the same slot,
    /// carrying over the old settings subtree on a best-effort basis (fields the new
    /// type does not recognize are silently dropped by its factory). Caller holds the
    /// slot's ctl mutex.
    ///
    /// At no instant does the cell dangle: the swap happens under both fair gates,
    /// and the old instance is closed only after the cell points at the new one, so
    /// pending consumers observe the change as their own I/O returning a miss.
    fn substitute(
        &self,
        slot: &RegistrySlot,
        old: &Arc<ProcInstance>,
        new_name: &str,
        proc_id: usize,
    ) -> ProcResult<()> {
        let descriptor = self.catalog.find(new_name).ok_or(ProcError::Invalid)?;

        let old_state = old.ctl_get()?;
        let carried = old_state
            .get(KEY_SETTINGS)
            .and_then(Value::as_object)
            .map(|settings| Settings::from_object(settings.clone()).to_json_string())
            .unwrap_or_default();

        let replacement = ProcInstance::open(
            &descriptor,
            &carried,
            proc_id,
            [DEFAULT_QUEUE_CAPACITY; 2],
        )?;

        // Release any consumer still blocked inside the old instance before taking
        // the gates it would otherwise hold.
        old.ctl_unblock();

        let displaced = {
            let _input = slot.input_gate.lock();
            let _output = slot.output_gate.lock();
            slot.swap(Some(Arc::new(replacement)))
        };
        if let Some(instance) = displaced {
            instance.close();
        }

        tracing::debug!(
            "substituted proc on slot {proc_id}: '{}' -> '{new_name}'",
            old.name()
        );
        Ok(())
    }

    /// DELETE internals, callable with the registry mutex already held.
    fn unregister_slot(&self, proc_id: usize) -> ProcResult<()> {
        let slot = &self.slots[proc_id];
        let occupant = slot.occupant().ok_or(ProcError::NotFound)?;

        // Wake blocked producers/consumers first; they hold the gates we need next.
        occupant.ctl_unblock();

        let removed = {
            let _ctl = slot.lock_ctl();
            let _input = slot.input_gate.lock();
            let _output = slot.output_gate.lock();
            slot.swap(None)
        };
        if let Some(instance) = removed {
            instance.close();
            tracing::debug!("deleted proc '{}' from slot {proc_id}", instance.name());
        }
        Ok(())
    }

    fn lock_api(&self) -> MutexGuard<'_, ()> {
        self.api_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProcRegistry {
    fn drop(&mut self) { self.close(); }
}

/// Rebuilds a state tree so its `settings` sub-object starts with `proc_name`. A
/// missing sub-object is created; a non-object tree is returned unchanged.
fn insert_proc_name(tree: Value, name: &str) -> Value {
    let Value::Object(map) = tree else {
        return tree;
    };
    let mut rebuilt = Map::new();
    let mut saw_settings = false;
    for (key, value) in map {
        if key == KEY_SETTINGS {
            saw_settings = true;
            rebuilt.insert(key, settings_with_name(value, name));
        } else {
            rebuilt.insert(key, value);
        }
    }
    if !saw_settings {
        rebuilt.insert(KEY_SETTINGS.into(), settings_with_name(Value::Null, name));
    }
    Value::Object(rebuilt)
}

fn settings_with_name(settings: Value, name: &str) -> Value {
    let mut with_name = Map::new();
    with_name.insert(KEY_PROC_NAME.into(), json!(name));
    if let Value::Object(existing) = settings {
        for (key, value) in existing {
            if key != KEY_PROC_NAME {
                with_name.insert(key, value);
            }
        }
    }
    Value::Object(with_name)
}
