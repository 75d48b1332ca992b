//! Field kinds, flags, and on-remove policy for the schema model.
//!
//! A [`Scheme`](crate::scheme::Scheme) is a named set of [`Field`]s. Each
//! field carries a [`FieldKind`] tag (what column type/shape it maps to),
//! a set of [`FieldFlags`], and for relational kinds an [`OnRemove`]
//! policy describing what happens to dependents when the referenced row
//! is deleted.

use std::sync::Arc;

use corestore_common::{Result, StoreError};

use crate::value::{Value, ValueRow};

/// What a field's values look like and how they're stored.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    Text,
    Bytes,
    /// Backend-native JSON/JSONB column holding an arbitrary document.
    Data,
    /// Like `Data`, but validated recursively against a nested scheme.
    Extra,
    /// A single foreign object reference (by oid) into `target`.
    Object { target: String },
    /// An unordered collection of scalars or object references.
    Set { element: Box<FieldKind> },
    /// An ordered collection of scalars or object references.
    Array { element: Box<FieldKind> },
    /// Externally-stored binary content; contract left to the caller.
    File,
    /// Externally-stored binary content with image-specific metadata;
    /// contract left to the caller.
    Image,
    /// A read-only projection computed by a query, not stored directly.
    View { of: String },
    /// A read-only full-text-search projection over one or more text
    /// fields, backed by the backend's FTS machinery.
    FullTextView { sources: Vec<String> },
    /// Computed at read time from other fields; never written. `None`
    /// until a resolver is registered for it, in which case reads leave
    /// the field unset rather than failing.
    Virtual(Option<VirtualResolver>),
    /// Backend-specific escape hatch identified by a caller-chosen tag.
    Custom(String),
}

/// How a [`FieldKind::Virtual`] field's value is produced from the other
/// fields already present on the row.
#[derive(Clone)]
pub struct VirtualResolver {
    /// Stored field names this resolver reads from. A row missing one of
    /// these (e.g. because a prior `FieldSelection` excluded it) cannot be
    /// resolved and the virtual field is left unset.
    pub deps: Vec<String>,
    pub read: Arc<dyn Fn(&ValueRow) -> Value + Send + Sync>,
}

impl VirtualResolver {
    pub fn new(deps: Vec<String>, read: impl Fn(&ValueRow) -> Value + Send + Sync + 'static) -> Self {
        Self { deps, read: Arc::new(read) }
    }
}

impl std::fmt::Debug for VirtualResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualResolver").field("deps", &self.deps).finish()
    }
}

impl FieldKind {
    /// Whether removing a referenced row requires an `on_remove` policy on
    /// this field: single object references and sets of object references
    /// both point at another scheme's rows.
    pub fn is_relational(&self) -> bool {
        matches!(self, FieldKind::Object { .. } | FieldKind::Set { .. })
    }

    pub fn is_stored(&self) -> bool {
        !matches!(
            self,
            FieldKind::View { .. } | FieldKind::FullTextView { .. } | FieldKind::Virtual { .. }
        )
    }
}

bitflags_like::bitflags! {
    /// Per-field behavioral flags.
    pub struct FieldFlags: u16 {
        const REQUIRED     = 0b0000_0001;
        const UNIQUE       = 0b0000_0010;
        const INDEXED      = 0b0000_0100;
        const READ_ONLY    = 0b0000_1000;
        const IMMUTABLE    = 0b0001_0000;
        const SOFT_LIMIT   = 0b0010_0000;
        /// Bumped to the transaction's `now` on every save, without the
        /// caller supplying a value - see `WorkerOptions::touch_only`.
        const AUTO_MTIME   = 0b0100_0000;
        /// Dropped from `FieldSelection::All`/`Exclude` results unless a
        /// caller names it explicitly via `FieldSelection::Only`.
        const FORCE_EXCLUDE = 0b1000_0000;
    }
}

/// Normalizes or validates a text field's value ahead of storage, beyond
/// what `FieldKind`/`FieldFlags` alone describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformHint {
    /// Globally unique, URL-safe slug within the owning scheme.
    Alias,
    Email,
    Url,
    PublicKey,
    /// Value is itself an array of the field's declared element type.
    Array,
}

/// What happens to a dependent row when the row it references is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnRemove {
    /// Delete the dependent row too.
    Cascade,
    /// Refuse the removal while a dependent exists.
    Restrict,
    /// Null out the reference on the dependent row.
    SetNull,
    /// Leave a dangling weak reference the reader must re-check.
    Reference,
    /// Like `Reference`, but the reference itself keeps the target alive
    /// (the target cannot be removed while this field points to it).
    StrongReference,
}

/// A single field in a [`Scheme`](crate::scheme::Scheme).
#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub flags: FieldFlags,
    pub on_remove: Option<OnRemove>,
    pub default: Option<Value>,
    pub transform: Option<TransformHint>,
    /// Minimum/maximum accepted length for `Text`/`Bytes` values, or
    /// element count for `Set`/`Array` values.
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub default_fn: Option<Arc<dyn Fn() -> Value + Send + Sync>>,
    /// Runs over every incoming value ahead of `FieldKind`/flag validation,
    /// producing the value actually stored - e.g. lower-casing an `Email`
    /// transform hint's input before the uniqueness check runs.
    pub replace_filter_fn: Option<Arc<dyn Fn(Value) -> Value + Send + Sync>>,
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("on_remove", &self.on_remove)
            .field("default", &self.default)
            .field("transform", &self.transform)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("default_fn", &self.default_fn.as_ref().map(|_| "<fn>"))
            .field("replace_filter_fn", &self.replace_filter_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            flags: FieldFlags::empty(),
            on_remove: None,
            default: None,
            transform: None,
            min_size: None,
            max_size: None,
            default_fn: None,
            replace_filter_fn: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.flags |= FieldFlags::REQUIRED;
        self
    }

    pub fn unique(mut self) -> Self {
        self.flags |= FieldFlags::UNIQUE;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.flags |= FieldFlags::INDEXED;
        self
    }

    pub fn soft_limit(mut self) -> Self {
        self.flags |= FieldFlags::SOFT_LIMIT;
        self
    }

    pub fn auto_mtime(mut self) -> Self {
        self.flags |= FieldFlags::AUTO_MTIME;
        self
    }

    pub fn force_exclude(mut self) -> Self {
        self.flags |= FieldFlags::FORCE_EXCLUDE;
        self
    }

    pub fn transform(mut self, hint: TransformHint) -> Self {
        self.transform = Some(hint);
        self
    }

    pub fn size_range(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn on_remove(mut self, policy: OnRemove) -> Result<Self> {
        if !self.kind.is_relational() {
            return Err(StoreError::logic(format!(
                "on_remove policy is only valid on Object/Set fields, got {:?} for '{}'",
                self.kind, self.name
            )));
        }
        self.on_remove = Some(policy);
        Ok(self)
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Computes the default at write time instead of holding one fixed
    /// value - e.g. a per-row random token.
    pub fn default_fn(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default_fn = Some(Arc::new(f));
        self
    }

    pub fn replace_filter_fn(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.replace_filter_fn = Some(Arc::new(f));
        self
    }

    /// The foreign scheme this field points at, if it is relational. For a
    /// `Set`, this is only `Some` when the set's element is itself an
    /// object reference; a set of scalars (e.g. `tags: Set<Text>`) is
    /// relational enough to need an `on_remove` policy for its join-table
    /// rows, but does not point at another scheme.
    pub fn target_scheme(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Object { target } => Some(target.as_str()),
            FieldKind::Set { element } => match element.as_ref() {
                FieldKind::Object { target } => Some(target.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A tiny inline bitflags implementation for a handful of per-field booleans.
mod bitflags_like {
    macro_rules! bitflags {
        (
            $(#[$meta:meta])*
            pub struct $name:ident: $ty:ty {
                $($(#[$vmeta:meta])* const $variant:ident = $value:expr;)*
            }
        ) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name($ty);

            impl $name {
                $($(#[$vmeta])* pub const $variant: $name = $name($value);)*

                pub const fn empty() -> Self {
                    $name(0)
                }

                pub fn contains(&self, other: $name) -> bool {
                    (self.0 & other.0) == other.0
                }
            }

            impl std::ops::BitOr for $name {
                type Output = $name;
                fn bitor(self, rhs: $name) -> $name {
                    $name(self.0 | rhs.0)
                }
            }

            impl std::ops::BitOrAssign for $name {
                fn bitor_assign(&mut self, rhs: $name) {
                    self.0 |= rhs.0;
                }
            }
        };
    }
    pub(crate) use bitflags;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_remove_rejects_non_relational_fields() {
        let err = Field::new("age", FieldKind::Integer).on_remove(OnRemove::Cascade);
        assert!(err.is_err());
    }

    #[test]
    fn on_remove_accepts_object_fields() {
        let field = Field::new(
            "owner",
            FieldKind::Object {
                target: "users".into(),
            },
        )
        .on_remove(OnRemove::Cascade)
        .unwrap();
        assert_eq!(field.on_remove, Some(OnRemove::Cascade));
    }

    #[test]
    fn flags_combine() {
        let field = Field::new("email", FieldKind::Text).required().unique();
        assert!(field.flags.contains(FieldFlags::REQUIRED));
        assert!(field.flags.contains(FieldFlags::UNIQUE));
        assert!(!field.flags.contains(FieldFlags::INDEXED));
    }
}
