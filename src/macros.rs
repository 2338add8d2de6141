// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// heavily inspired by [serde_json]'s `json!` macro
// [serde_json]: https://github.com/serde-rs/json

#[cfg(doc)]
use crate::Value;

macro_rules! hash_map {
    () => {std::collections::HashMap::new()};
    ( $($key:expr => $value:expr),* $(,)? ) => {
        {
            let mut m = std::collections::HashMap::new();
            $(
                m.insert($key, $value);
            )*
            m
        }
    };
}

pub(crate) use hash_map;

/// Short notation for creating a [`Value`].
///
/// # Examples
///
/// Special values:
/// ```
/// use graphbolt::{value, Value};
///
/// // null
/// assert_eq!(Value::Null, value!(null));
///
/// // true, false
/// assert_eq!(Value::Boolean(true), value!(true));
/// assert_eq!(Value::Boolean(false), value!(false));
/// ```
///
/// Any value that implements `Into<Value>`:
/// ```
/// use graphbolt::{value, Value};
///
/// assert_eq!(Value::Integer(1), value!(1));
/// assert_eq!(Value::Float(1.234), value!(1.234));
/// assert_eq!(Value::String(String::from("foo")), value!("foo"));
/// ```
///
/// Create a [`Value::List`]:
/// ```
/// use graphbolt::{value, Value};
///
/// assert_eq!(
///     Value::List(vec![Value::Integer(1), Value::Float(2.), Value::Null]),
///     value!([1, 2., null])
/// );
/// ```
///
/// Create a [`Value::Map`]:
/// ```
/// use std::collections::HashMap;
/// use graphbolt::{value, Value};
///
/// let mut map = HashMap::new();
/// map.insert(String::from("foo"), Value::Integer(1));
/// map.insert(String::from("bar"), Value::Null);
///
/// assert_eq!(Value::Map(map), value!({"foo": 1, "bar": null}));
/// ```
#[macro_export(local_inner_macros)]
macro_rules! value {
    ($($value:tt)+) => {
        __value_internal!($($value)+)
    };
}

/// Short notation for creating a [`HashMap<String, Value>`](std::collections::HashMap),
/// e.g., for query parameters.
///
/// # Example
/// ```
/// use std::collections::HashMap;
/// use graphbolt::{value_map, Value};
///
/// let mut map = HashMap::new();
/// map.insert(String::from("x"), Value::Integer(123));
///
/// assert_eq!(map, value_map!({"x": 123}));
/// ```
#[macro_export(local_inner_macros)]
macro_rules! value_map {
    ({}) => {
        std::collections::HashMap::<std::string::String, $crate::Value>::new()
    };
    ({ $($tt:tt)+ }) => {
        {
            let mut map = std::collections::HashMap::<std::string::String, $crate::Value>::new();
            __value_internal!(@map map () ($($tt)+) ($($tt)+));
            map
        }
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! __value_internal {
    //////////////////////////////////////////////////////////////////////////
    // TT muncher for parsing the inside of a list [...].
    // Produces a vec![...] of the elements.
    //
    // Must be invoked as: __value_internal!(@list [] $($tt)*)
    //////////////////////////////////////////////////////////////////////////

    // Done with trailing comma.
    (@list [$($elems:expr,)*]) => {
        std::vec![$($elems,)*]
    };

    // Done without trailing comma.
    (@list [$($elems:expr),*]) => {
        std::vec![$($elems),*]
    };

    // Next element is `null`.
    (@list [$($elems:expr,)*] null $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!(null)] $($rest)*)
    };

    // Next element is a list.
    (@list [$($elems:expr,)*] [$($array:tt)*] $($rest:tt)*) => {
        $crate::__value_internal!(
            @list [$($elems,)* $crate::__value_internal!([$($array)*])] $($rest)*
        )
    };

    // Next element is a map.
    (@list [$($elems:expr,)*] {$($map:tt)*} $($rest:tt)*) => {
        $crate::__value_internal!(
            @list [$($elems,)* $crate::__value_internal!({$($map)*})] $($rest)*
        )
    };

    // Next element is an expression followed by comma.
    (@list [$($elems:expr,)*] $next:expr, $($rest:tt)*) => {
        $crate::__value_internal!(
            @list [$($elems,)* $crate::__value_internal!($next),] $($rest)*
        )
    };

    // Last element is an expression with no trailing comma.
    (@list [$($elems:expr,)*] $last:expr) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!($last)])
    };

    // Comma after the most recent element.
    (@list [$($elems:expr),*] , $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)*] $($rest)*)
    };

    //////////////////////////////////////////////////////////////////////////
    // TT muncher for parsing the inside of a map {...}.
    // Each entry is inserted into the given map variable.
    //
    // Must be invoked as: __value_internal!(@map $map () ($($tt)*) ($($tt)*))
    //
    // The second parenthesized group is the remaining tokens; the third is a
    // copy used to match on the key when an entry is complete.
    //////////////////////////////////////////////////////////////////////////

    // Done.
    (@map $map:ident () () ()) => {};

    // Insert the current entry followed by trailing comma.
    (@map $map:ident [$($key:tt)+] ($value:expr) , $($rest:tt)*) => {
        let _ = $map.insert(($($key)+).into(), $value);
        $crate::__value_internal!(@map $map () ($($rest)*) ($($rest)*));
    };

    // Insert the last entry without trailing comma.
    (@map $map:ident [$($key:tt)+] ($value:expr)) => {
        let _ = $map.insert(($($key)+).into(), $value);
    };

    // Next value is `null`.
    (@map $map:ident ($($key:tt)+) (: null $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(
            @map $map [$($key)+] ($crate::__value_internal!(null)) $($rest)*
        );
    };

    // Next value is a list.
    (@map $map:ident ($($key:tt)+) (: [$($array:tt)*] $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(
            @map $map [$($key)+] ($crate::__value_internal!([$($array)*])) $($rest)*
        );
    };

    // Next value is a map.
    (@map $map:ident ($($key:tt)+) (: {$($m:tt)*} $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(
            @map $map [$($key)+] ($crate::__value_internal!({$($m)*})) $($rest)*
        );
    };

    // Next value is an expression followed by comma.
    (@map $map:ident ($($key:tt)+) (: $value:expr , $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(
            @map $map [$($key)+] ($crate::__value_internal!($value)) , $($rest)*
        );
    };

    // Last value is an expression with no trailing comma.
    (@map $map:ident ($($key:tt)+) (: $value:expr) $copy:tt) => {
        $crate::__value_internal!(@map $map [$($key)+] ($crate::__value_internal!($value)));
    };

    // Munch a token into the current key.
    (@map $map:ident ($($key:tt)*) ($tt:tt $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map ($($key)* $tt) ($($rest)*) ($($rest)*));
    };

    //////////////////////////////////////////////////////////////////////////
    // The main implementation.
    //////////////////////////////////////////////////////////////////////////

    (null) => {
        $crate::Value::Null
    };

    ([]) => {
        $crate::Value::List(std::vec::Vec::new())
    };

    ([ $($tt:tt)+ ]) => {
        $crate::Value::List($crate::__value_internal!(@list [] $($tt)+))
    };

    ({}) => {
        $crate::Value::Map(std::collections::HashMap::new())
    };

    ({ $($tt:tt)+ }) => {
        $crate::Value::Map({
            let mut map = std::collections::HashMap::new();
            $crate::__value_internal!(@map map () ($($tt)+) ($($tt)+));
            map
        })
    };

    ($other:expr) => {
        $crate::Value::from($other)
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::Value;

    #[test]
    fn test_value_scalars() {
        assert_eq!(value!(null), Value::Null);
        assert_eq!(value!(true), Value::Boolean(true));
        assert_eq!(value!(1), Value::Integer(1));
        assert_eq!(value!(-1), Value::Integer(-1));
        assert_eq!(value!(1.5), Value::Float(1.5));
        assert_eq!(value!("foo"), Value::String("foo".into()));
    }

    #[test]
    fn test_value_nested() {
        let value = value!({"outer": {"inner": [1, null, "three"]}, "flag": true});
        let Value::Map(mut map) = value else {
            panic!("expected map");
        };
        assert_eq!(map.remove("flag"), Some(Value::Boolean(true)));
        let Some(Value::Map(mut outer)) = map.remove("outer") else {
            panic!("expected inner map");
        };
        assert_eq!(
            outer.remove("inner"),
            Some(Value::List(vec![
                Value::Integer(1),
                Value::Null,
                Value::String("three".into()),
            ]))
        );
    }

    #[test]
    fn test_value_map() {
        let map: HashMap<String, Value> = value_map!({"x": 1, "y": "z"});
        assert_eq!(map.len(), 2);
        assert_eq!(map["x"], Value::Integer(1));
        assert_eq!(map["y"], Value::String("z".into()));
    }
}
