//! Parameter back-end: named get/set access to a managed object
//!
//! A capability implementation embeds a [`ParamBackEnd<M>`] for its own type
//! `M` and registers one [`ParamEntry`] per exported parameter. Each entry is
//! built where both `M` and the value type `V` are statically known, and
//! captures a getter/setter pair for exactly that `V`. A generic client later
//! moves values through an untyped storage pointer ("blob"); the parameter
//! identifier is the only thing telling it which `V` the blob must hold.
//!
//! ```
//! use capsule_abi::params::{ParamBackEnd, Parameterized};
//!
//! #[derive(Default)]
//! struct Simplex {
//!     max_iters: u32,
//! }
//!
//! let params = ParamBackEnd::new()
//!     .with_param("iter max", |s: &Simplex| s.max_iters, |s, v| s.max_iters = v)
//!     .unwrap();
//! let mut solver = Parameterized::new(Simplex::default(), params);
//!
//! solver.set_value("iter max", 500u32).unwrap();
//! assert_eq!(solver.get_value::<u32>("iter max").unwrap(), 500);
//! ```

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::ffi::{CString, c_char, c_void};
use std::mem::MaybeUninit;

use crate::error::ParamError;

type Getter<M> = Box<dyn Fn(&M, *mut c_void)>;
type Setter<M> = Box<dyn Fn(&mut M, *const c_void)>;

/// One exported parameter of a managed type `M`.
pub struct ParamEntry<M> {
    value_type: TypeId,
    type_name: &'static str,
    get: Getter<M>,
    set: Setter<M>,
}

impl<M> ParamEntry<M> {
    /// Bind a getter/setter pair for a parameter of type `V`.
    ///
    /// Plain method paths work, e.g.
    /// `ParamEntry::new(Solver::tolerance, Solver::set_tolerance)`.
    pub fn new<V, G, S>(getter: G, setter: S) -> Self
    where
        M: 'static,
        V: Clone + 'static,
        G: Fn(&M) -> V + 'static,
        S: Fn(&mut M, V) + 'static,
    {
        Self {
            value_type: TypeId::of::<V>(),
            type_name: type_name::<V>(),
            // These closures are only invoked from the unsafe accessors on
            // ParamBackEnd, whose callers guarantee `blob` is storage for a V.
            get: Box::new(move |managed: &M, blob: *mut c_void| {
                let value = getter(managed);
                unsafe { blob.cast::<V>().write(value) };
            }),
            set: Box::new(move |managed: &mut M, blob: *const c_void| {
                let value = unsafe { (*blob.cast::<V>()).clone() };
                setter(managed, value);
            }),
        }
    }

    pub fn value_type(&self) -> TypeId {
        self.value_type
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn check<V: 'static>(&self, ident: &str) -> Result<(), ParamError> {
        if self.value_type == TypeId::of::<V>() {
            Ok(())
        } else {
            Err(ParamError::TypeMismatch {
                param: ident.to_string(),
                expected: self.type_name,
                found: type_name::<V>(),
            })
        }
    }
}

impl<M> std::fmt::Debug for ParamEntry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamEntry")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Parameter table for one managed instance, plus the capabilities the
/// enclosing object supports.
pub struct ParamBackEnd<M> {
    /// Parameter identifiers in registration order
    param_ids: Vec<String>,
    /// NUL-terminated copies of `param_ids`, for the C handle
    c_param_ids: Vec<CString>,
    c_param_ptrs: Vec<*const c_char>,
    entries: HashMap<String, ParamEntry<M>>,
    /// Capability identifiers in registration order
    api_ids: Vec<String>,
    c_api_ids: Vec<CString>,
    c_api_ptrs: Vec<*const c_char>,
    api_ptrs: HashMap<String, *mut c_void>,
}

impl<M> ParamBackEnd<M> {
    pub fn new() -> Self {
        Self {
            param_ids: Vec::new(),
            c_param_ids: Vec::new(),
            c_param_ptrs: Vec::new(),
            entries: HashMap::new(),
            api_ids: Vec::new(),
            c_api_ids: Vec::new(),
            c_api_ptrs: Vec::new(),
            api_ptrs: HashMap::new(),
        }
    }

    // ─── Parameters ──────────────────────────────────────────────────

    /// Export a parameter.
    ///
    /// Registering an identifier a second time replaces the earlier entry
    /// (last registration wins) and keeps its position in
    /// [`report_params`](Self::report_params).
    pub fn add_param(
        &mut self,
        ident: impl Into<String>,
        entry: ParamEntry<M>,
    ) -> Result<(), ParamError> {
        let ident = ident.into();

        if let Some(previous) = self.entries.get_mut(&ident) {
            tracing::warn!(
                param = %ident,
                previous_type = previous.type_name,
                new_type = entry.type_name,
                "Parameter registered twice, replacing earlier entry"
            );
            *previous = entry;
            return Ok(());
        }

        let c_ident = CString::new(ident.as_str())
            .map_err(|_| ParamError::InvalidIdentifier(ident.clone()))?;
        self.c_param_ptrs.push(c_ident.as_ptr());
        self.c_param_ids.push(c_ident);
        self.param_ids.push(ident.clone());
        self.entries.insert(ident, entry);
        Ok(())
    }

    /// Builder form of [`add_param`](Self::add_param).
    pub fn with_param<V, G, S>(
        mut self,
        ident: impl Into<String>,
        getter: G,
        setter: S,
    ) -> Result<Self, ParamError>
    where
        M: 'static,
        V: Clone + 'static,
        G: Fn(&M) -> V + 'static,
        S: Fn(&mut M, V) + 'static,
    {
        self.add_param(ident, ParamEntry::new(getter, setter))?;
        Ok(self)
    }

    /// Identifiers of all exported parameters, in registration order.
    pub fn report_params(&self) -> &[String] {
        &self.param_ids
    }

    pub fn has_param(&self, ident: &str) -> bool {
        self.entries.contains_key(ident)
    }

    /// Registered value type of a parameter.
    pub fn value_type(&self, ident: &str) -> Option<(TypeId, &'static str)> {
        self.entries
            .get(ident)
            .map(|entry| (entry.value_type, entry.type_name))
    }

    pub(crate) fn c_params(&self) -> &[*const c_char] {
        &self.c_param_ptrs
    }

    fn entry(&self, ident: &str) -> Result<&ParamEntry<M>, ParamError> {
        self.entries
            .get(ident)
            .ok_or_else(|| ParamError::unknown(ident))
    }

    /// Write the current value of `ident` into `blob`.
    ///
    /// `blob` is treated as uninitialised storage: its previous contents are
    /// neither read nor dropped.
    ///
    /// # Safety
    ///
    /// `blob` must be valid, aligned storage for the value type registered for
    /// `ident`.
    pub unsafe fn get(&self, managed: &M, ident: &str, blob: *mut c_void) -> Result<(), ParamError> {
        let entry = self.entry(ident)?;
        if blob.is_null() {
            return Err(ParamError::NullBlob(ident.to_string()));
        }
        (entry.get)(managed, blob);
        Ok(())
    }

    /// Apply the value stored at `blob` to `ident`.
    ///
    /// # Safety
    ///
    /// `blob` must point at an initialised value of the type registered for
    /// `ident`. The value is cloned; the caller keeps ownership.
    pub unsafe fn set(
        &self,
        managed: &mut M,
        ident: &str,
        blob: *const c_void,
    ) -> Result<(), ParamError> {
        let entry = self.entry(ident)?;
        if blob.is_null() {
            return Err(ParamError::NullBlob(ident.to_string()));
        }
        (entry.set)(managed, blob);
        Ok(())
    }

    /// Typed, checked form of [`get`](Self::get).
    pub fn get_value<V: 'static>(&self, managed: &M, ident: &str) -> Result<V, ParamError> {
        let entry = self.entry(ident)?;
        entry.check::<V>(ident)?;
        let mut slot = MaybeUninit::<V>::uninit();
        (entry.get)(managed, slot.as_mut_ptr().cast());
        // SAFETY: the entry's value type is V, so its getter initialised the slot.
        Ok(unsafe { slot.assume_init() })
    }

    /// Typed, checked form of [`set`](Self::set).
    pub fn set_value<V: 'static>(
        &self,
        managed: &mut M,
        ident: &str,
        value: V,
    ) -> Result<(), ParamError> {
        let entry = self.entry(ident)?;
        entry.check::<V>(ident)?;
        (entry.set)(managed, (&value as *const V).cast());
        Ok(())
    }

    // ─── Capabilities ────────────────────────────────────────────────

    /// Record that the enclosing object supports `api`, implemented by `obj`.
    ///
    /// Recording `api` again only replaces its pointer.
    ///
    /// `obj` is the enclosing object itself when it implements the capability
    /// directly, or one of its members when it delegates.
    pub fn add_api_id(
        &mut self,
        api: impl Into<String>,
        obj: *mut c_void,
    ) -> Result<(), ParamError> {
        let api = api.into();
        if let Some(previous) = self.api_ptrs.get_mut(&api) {
            *previous = obj;
            return Ok(());
        }

        let c_api =
            CString::new(api.as_str()).map_err(|_| ParamError::InvalidIdentifier(api.clone()))?;
        self.c_api_ptrs.push(c_api.as_ptr());
        self.c_api_ids.push(c_api);
        self.api_ids.push(api.clone());
        self.api_ptrs.insert(api, obj);
        Ok(())
    }

    /// Capabilities recorded by [`add_api_id`](Self::add_api_id).
    pub fn get_apis(&self) -> &[String] {
        &self.api_ids
    }

    pub(crate) fn c_apis(&self) -> &[*const c_char] {
        &self.c_api_ptrs
    }

    /// Object implementing `api`, if one was recorded.
    pub fn get_api_ptr(&self, api: &str) -> Option<*mut c_void> {
        self.api_ptrs.get(api).copied()
    }
}

impl<M> Default for ParamBackEnd<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for ParamBackEnd<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamBackEnd")
            .field("params", &self.param_ids)
            .field("apis", &self.api_ids)
            .finish()
    }
}

// ─── Type-erased view ────────────────────────────────────────────────

/// Parameter access without knowledge of the managed type.
pub trait ParamBe {
    /// Identifiers of all exported parameters, in registration order
    fn report_params(&self) -> &[String];

    /// Registered value type of a parameter
    fn value_type(&self, ident: &str) -> Option<(TypeId, &'static str)>;

    /// # Safety
    ///
    /// See [`ParamBackEnd::get`].
    unsafe fn get(&self, ident: &str, blob: *mut c_void) -> Result<(), ParamError>;

    /// # Safety
    ///
    /// See [`ParamBackEnd::set`].
    unsafe fn set(&mut self, ident: &str, blob: *const c_void) -> Result<(), ParamError>;

    fn get_apis(&self) -> &[String];

    fn get_api_ptr(&self, api: &str) -> Option<*mut c_void>;
}

impl dyn ParamBe + '_ {
    fn check<V: 'static>(&self, ident: &str) -> Result<(), ParamError> {
        match self.value_type(ident) {
            None => Err(ParamError::unknown(ident)),
            Some((id, _)) if id == TypeId::of::<V>() => Ok(()),
            Some((_, expected)) => Err(ParamError::TypeMismatch {
                param: ident.to_string(),
                expected,
                found: type_name::<V>(),
            }),
        }
    }

    /// Typed, checked get through the erased view.
    pub fn get_value<V: 'static>(&self, ident: &str) -> Result<V, ParamError> {
        self.check::<V>(ident)?;
        let mut slot = MaybeUninit::<V>::uninit();
        // SAFETY: the registered type was just checked to be V.
        unsafe {
            self.get(ident, slot.as_mut_ptr().cast())?;
            Ok(slot.assume_init())
        }
    }

    /// Typed, checked set through the erased view.
    pub fn set_value<V: 'static>(&mut self, ident: &str, value: V) -> Result<(), ParamError> {
        self.check::<V>(ident)?;
        // SAFETY: as above.
        unsafe { self.set(ident, (&value as *const V).cast()) }
    }
}

/// A managed value paired with its parameter back-end.
#[derive(Debug)]
pub struct Parameterized<M> {
    value: M,
    params: ParamBackEnd<M>,
}

impl<M> Parameterized<M> {
    pub fn new(value: M, params: ParamBackEnd<M>) -> Self {
        Self { value, params }
    }

    pub fn value(&self) -> &M {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut M {
        &mut self.value
    }

    pub fn params(&self) -> &ParamBackEnd<M> {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamBackEnd<M> {
        &mut self.params
    }

    pub fn into_inner(self) -> M {
        self.value
    }

    pub fn get_value<V: 'static>(&self, ident: &str) -> Result<V, ParamError> {
        self.params.get_value(&self.value, ident)
    }

    pub fn set_value<V: 'static>(&mut self, ident: &str, value: V) -> Result<(), ParamError> {
        self.params.set_value(&mut self.value, ident, value)
    }
}

impl<M> ParamBe for Parameterized<M> {
    fn report_params(&self) -> &[String] {
        self.params.report_params()
    }

    fn value_type(&self, ident: &str) -> Option<(TypeId, &'static str)> {
        self.params.value_type(ident)
    }

    unsafe fn get(&self, ident: &str, blob: *mut c_void) -> Result<(), ParamError> {
        unsafe { self.params.get(&self.value, ident, blob) }
    }

    unsafe fn set(&mut self, ident: &str, blob: *const c_void) -> Result<(), ParamError> {
        unsafe { self.params.set(&mut self.value, ident, blob) }
    }

    fn get_apis(&self) -> &[String] {
        self.params.get_apis()
    }

    fn get_api_ptr(&self, api: &str) -> Option<*mut c_void> {
        self.params.get_api_ptr(api)
    }
}
