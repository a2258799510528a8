//! Types and the declaration registry

pub mod type_system;
pub mod registry;

pub use type_system::{ScalarType, Substitution, Ty};
pub use registry::{
    AliasDef, BodyUnit, DefaultsUnit, ExtensionDef, FieldDef, Frozen, MethodEntry, MethodId, MethodSig,
    MethodSource, NamespaceKind, ParamSig, RegistryBuilder, Resolution, TraitDef, TypeDef,
    TypeKind, TypeRegistry,
};
