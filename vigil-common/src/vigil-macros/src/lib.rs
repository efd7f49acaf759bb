use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DataEnum, DeriveInput, Fields, LitStr, Variant};

/// Turns `SomeVariantName` into `some variant name`
fn sentence_from_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);

    for (i, c) in s.char_indices() {
        if c.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.push(c.to_ascii_lowercase());
    }

    out
}

fn expect_enum(input: &DeriveInput, derive: &str) -> DataEnum {
    match &input.data {
        syn::Data::Enum(data_enum) => data_enum.clone(),
        _ => panic!("{derive} can only be derived on enums"),
    }
}

/// Builds the match pattern of a variant ignoring any field it holds
fn variant_pattern(v: &Variant) -> TokenStream2 {
    let name = &v.ident;
    match &v.fields {
        Fields::Unit => quote!(Self::#name),
        Fields::Unnamed(f) => {
            let wildcards = vec![quote!(_); f.unnamed.len()];
            quote!(Self::#name(#(#wildcards),*))
        }
        Fields::Named(_) => quote!(Self::#name { .. }),
    }
}

fn has_attr(v: &Variant, name: &str) -> bool {
    v.attrs.iter().any(|a| a.path().is_ident(name))
}

fn str_attr(v: &Variant, name: &str) -> Option<LitStr> {
    v.attrs
        .iter()
        .find(|a| a.path().is_ident(name))
        .map(|a| a.parse_args::<LitStr>().expect("expecting a string literal"))
}

/// Derives `name()` and `description()` const methods on error enums usable
/// in eBPF code, where `core::fmt` is not an option.
///
/// * `#[error("...")]` sets the description
/// * `#[generate]` derives the description from the variant name
/// * `#[wrap]` forwards the description of the single wrapped error
#[proc_macro_derive(BpfError, attributes(error, generate, wrap))]
pub fn error_derive(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let enum_name = &input.ident;
    let data_enum = expect_enum(&input, "BpfError");

    let mut name_arms = vec![];
    let mut desc_arms = vec![];

    for v in data_enum.variants.iter() {
        let pattern = variant_pattern(v);
        let name_str = v.ident.to_string();

        name_arms.push(quote!(#pattern => #name_str,));

        if has_attr(v, "wrap") {
            let name = &v.ident;
            match &v.fields {
                Fields::Unnamed(f) if f.unnamed.len() == 1 => {
                    desc_arms.push(quote!(Self::#name(inner) => inner.description(),))
                }
                _ => panic!("#[wrap] variant must hold exactly one unnamed field"),
            }
        } else if let Some(msg) = str_attr(v, "error") {
            desc_arms.push(quote!(#pattern => #msg,));
        } else if has_attr(v, "generate") {
            let msg = sentence_from_ident(&name_str);
            desc_arms.push(quote!(#pattern => #msg,));
        } else {
            desc_arms.push(quote!(#pattern => #name_str,));
        }
    }

    quote!(
        impl #enum_name {
            #[inline(always)]
            pub const fn name(&self) -> &'static str {
                match self {
                    #(#name_arms)*
                }
            }

            #[inline(always)]
            pub const fn description(&self) -> &'static str {
                match self {
                    #(#desc_arms)*
                }
            }
        }
    )
    .into()
}

/// Derives string conversions for fieldless enums. The string of a variant
/// is given by `#[str("...")]` and defaults to the variant name.
#[proc_macro_derive(StrEnum, attributes(str))]
pub fn str_enum_derive(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let enum_name = &input.ident;
    let data_enum = expect_enum(&input, "StrEnum");

    let mut as_str_arms = vec![];
    let mut from_str_arms = vec![];
    let mut variants = vec![];

    for v in data_enum.variants.iter() {
        if !matches!(v.fields, Fields::Unit) {
            panic!("StrEnum variants cannot hold values")
        }

        let name = &v.ident;
        let s = str_attr(v, "str")
            .map(|l| l.value())
            .unwrap_or_else(|| name.to_string());

        as_str_arms.push(quote!(Self::#name => #s,));
        from_str_arms.push(quote!(#s => Ok(Self::#name),));
        variants.push(quote!(Self::#name,));
    }

    let count = variants.len();

    quote!(
        impl core::str::FromStr for #enum_name {
            type Err = &'static str;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    #(#from_str_arms)*
                    _ => Err("unknown variant string"),
                }
            }
        }

        impl #enum_name {
            pub const fn variants() -> [Self; #count] {
                [
                    #(#variants)*
                ]
            }

            #[inline(always)]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    #(#as_str_arms)*
                }
            }
        }
    )
    .into()
}
