//! Field lenses.
//!
//! A [`Lens`] selects one field of a value: a getter that clones the field
//! out and a setter that writes a new value in. Lenses replace path-based
//! property access for reading, mutating and observing single fields of a
//! model.
//!
//! ```rust,ignore
//! #[derive(Clone, PartialEq)]
//! struct Settings { volume: u8 }
//!
//! let volume = lens!(Settings, volume);
//! let mut s = Settings { volume: 3 };
//! volume.set(&mut s, 7);
//! assert_eq!(volume.get(&s), 7);
//! ```

use std::fmt;

/// A getter/setter pair selecting a field `F` of `S`.
pub struct Lens<S, F> {
    get: fn(&S) -> F,
    set: fn(&mut S, F),
}

impl<S, F> Lens<S, F> {
    /// Create a lens from a getter and a setter.
    pub const fn new(get: fn(&S) -> F, set: fn(&mut S, F)) -> Self {
        Self { get, set }
    }

    /// Read the field.
    pub fn get(&self, source: &S) -> F {
        (self.get)(source)
    }

    /// Overwrite the field.
    pub fn set(&self, source: &mut S, value: F) {
        (self.set)(source, value)
    }

    /// Overwrite the field on an owned value and return it.
    pub fn with(&self, mut source: S, value: F) -> S {
        (self.set)(&mut source, value);
        source
    }

    /// Compose with a lens into the selected field.
    ///
    /// The result is a [`ComposedLens`] because function pointers cannot
    /// capture the two inner lenses.
    pub fn then<G>(self, inner: Lens<F, G>) -> ComposedLens<S, F, G> {
        ComposedLens { outer: self, inner }
    }
}

impl<S, F> Clone for Lens<S, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, F> Copy for Lens<S, F> {}

impl<S, F> fmt::Debug for Lens<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lens")
            .field("source", &std::any::type_name::<S>())
            .field("field", &std::any::type_name::<F>())
            .finish()
    }
}

/// Two lenses applied one after the other.
pub struct ComposedLens<S, F, G> {
    outer: Lens<S, F>,
    inner: Lens<F, G>,
}

impl<S, F, G> ComposedLens<S, F, G> {
    /// Read the nested field.
    pub fn get(&self, source: &S) -> G {
        self.inner.get(&self.outer.get(source))
    }

    /// Overwrite the nested field, leaving the rest of the middle value intact.
    pub fn set(&self, source: &mut S, value: G) {
        let mut middle = self.outer.get(source);
        self.inner.set(&mut middle, value);
        self.outer.set(source, middle);
    }
}

impl<S, F, G> Clone for ComposedLens<S, F, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, F, G> Copy for ComposedLens<S, F, G> {}

/// Field selection abstracted over plain and composed lenses.
pub trait FieldLens<S>: Copy + Send + Sync + 'static {
    /// The selected field type.
    type Field;

    /// Read the field.
    fn get_field(&self, source: &S) -> Self::Field;

    /// Overwrite the field.
    fn set_field(&self, source: &mut S, value: Self::Field);
}

impl<S: 'static, F: 'static> FieldLens<S> for Lens<S, F> {
    type Field = F;

    fn get_field(&self, source: &S) -> F {
        self.get(source)
    }

    fn set_field(&self, source: &mut S, value: F) {
        self.set(source, value)
    }
}

impl<S: 'static, F: 'static, G: 'static> FieldLens<S> for ComposedLens<S, F, G> {
    type Field = G;

    fn get_field(&self, source: &S) -> G {
        self.get(source)
    }

    fn set_field(&self, source: &mut S, value: G) {
        self.set(source, value)
    }
}

/// Build a [`Lens`] for a named field: `lens!(Model, field)`.
///
/// The field type must be `Clone`.
#[macro_export]
macro_rules! lens {
    ($ty:ty, $field:ident) => {
        $crate::Lens::new(
            |source: &$ty| ::std::clone::Clone::clone(&source.$field),
            |source: &mut $ty, value| source.$field = value,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Window {
        title: String,
        frame: Frame,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Frame {
        width: u32,
        height: u32,
    }

    fn window() -> Window {
        Window {
            title: "main".into(),
            frame: Frame { width: 640, height: 480 },
        }
    }

    #[test]
    fn lens_reads_and_writes_field() {
        let title = lens!(Window, title);
        let mut w = window();

        assert_eq!(title.get(&w), "main");
        title.set(&mut w, "prefs".into());
        assert_eq!(w.title, "prefs");
        assert_eq!(w.frame.width, 640);
    }

    #[test]
    fn with_returns_updated_copy() {
        let title = lens!(Window, title);
        let w = title.with(window(), "about".into());
        assert_eq!(w.title, "about");
    }

    #[test]
    fn composed_lens_updates_nested_field_only() {
        let width = lens!(Window, frame).then(lens!(Frame, width));
        let mut w = window();

        assert_eq!(width.get(&w), 640);
        width.set(&mut w, 800);
        assert_eq!(w.frame, Frame { width: 800, height: 480 });
        assert_eq!(w.title, "main");
    }
}
