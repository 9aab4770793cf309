//! A small hand-rolled bitflag-set macro.
//!
//! Every flag combination actually used gets a named constant rather than
//! loose booleans. `bitflags` isn't in the dependency tree, so rather than
//! add a dependency for a handful of small closed sets, this macro builds
//! the same shape (a `Copy` newtype over an unsigned integer with named
//! constants, `contains`/`union`/`insert`/`remove`) directly.

#[macro_export]
macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident: $repr:ty {
            $($flag:ident = $value:expr),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash)]
        $vis struct $name($repr);

        impl $name {
            $(pub const $flag: $name = $name($value);)*

            pub const NONE: $name = $name(0);

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn contains(self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn intersects(self, other: $name) -> bool {
                (self.0 & other.0) != 0
            }

            pub const fn union(self, other: $name) -> $name {
                $name(self.0 | other.0)
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: $name, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut first = true;
                write!(f, "{}(", stringify!($name))?;
                $(
                    if self.contains($name::$flag) {
                        if !first {
                            write!(f, "|")?;
                        }
                        write!(f, stringify!($flag))?;
                        first = false;
                    }
                )*
                write!(f, ")")
            }
        }
    };
}
