//! Derive macros for the canonical wire serialization traits.
//!
//! `#[derive(EmberSerialize)]` and `#[derive(EmberDeserialize)]` expand to
//! field-by-field implementations of the `EmberSerialize` /
//! `EmberDeserialize` traits defined in `ember-chain`. The derives assume
//! the traits and `SerializationError` are in scope at the use site.

extern crate proc_macro;
use proc_macro::TokenStream;

mod deserialize;
mod serialize;

#[proc_macro_derive(EmberDeserialize)]
pub fn deserializable(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    deserialize::impl_deser_macro(&ast)
}

#[proc_macro_derive(EmberSerialize)]
pub fn serializable(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    serialize::impl_ser_macro(&ast)
}
