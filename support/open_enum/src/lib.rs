// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![no_std]

//! Provides the [`open_enum`] macro.

/// Declares a newtype with named constant values that behaves like an enum,
/// but accepts any value of the underlying type.
///
/// Use this for wire values such as status and control codes, where a peer
/// may send a value this side has no name for. The generated type is a
/// `#[repr(transparent)]` struct with a `pub` field and one associated
/// constant per variant.
///
/// The macro implements `Copy`, `Clone`, `Debug`, `Eq`, `PartialEq`, `Hash`,
/// `Ord` and `PartialOrd`. `Debug` prints the variant name for known values
/// and the raw value otherwise.
///
/// # Examples
///
/// ```
/// use open_enum::open_enum;
///
/// open_enum! {
///     /// A completion status.
///     pub enum Status: u32 {
///         #![allow(missing_docs)] // applies to the generated impl block
///         SUCCESS = 0,
///         CANCELLED = 0xC000_0120,
///     }
/// }
///
/// assert_eq!(Status::CANCELLED.0, 0xC000_0120);
/// assert_eq!(format!("{:?}", Status::SUCCESS), "SUCCESS");
/// assert_eq!(format!("{:?}", Status(7)), "7");
/// ```
#[macro_export]
macro_rules! open_enum {
    (
        $(#[$a:meta])*
        $v:vis enum $name:ident : $storage:ty {
            $(#![$implattr:meta])*
            $(
                $(#[$vattr:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        #[repr(transparent)]
        $(#[$a])*
        $v struct $name(pub $storage);
        $(#[$implattr])*
        impl $name {
            $(
                $(#[$vattr])*
                pub const $variant: $name = $name($value);
            )*
        }
        impl ::core::fmt::Debug for $name {
            fn fmt(&self, fmt: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                #![allow(unreachable_patterns)]
                let s = match *self {
                    $( Self::$variant => stringify!($variant), )*
                    _ => {
                        return ::core::fmt::Debug::fmt(&self.0, fmt);
                    }
                };
                fmt.pad(s)
            }
        }
    }
}
