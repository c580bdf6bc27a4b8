#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the host integer model")]
#![expect(clippy::must_use_candidate, reason = "builder-style APIs read better unannotated")]
#![expect(clippy::return_self_not_must_use, reason = "builder-style APIs read better unannotated")]
#![expect(clippy::missing_panics_doc, reason = "lock poisoning is the only library panic source")]

mod arithmetic;
mod cache;
mod context;
mod engine;
mod error;
mod frame;
mod interpreter;
mod introspect;
mod lexer;
mod operators;
mod options;
mod parse;
mod scope;
mod span;
mod template;
mod tree;
mod value;

pub use crate::{
    arithmetic::{Arithmetic, DefaultArithmetic},
    context::{CancelHandle, Context, MapContext},
    engine::{AnnotationProcessor, Engine, EngineBuilder, Script},
    error::{ErrorKind, EvalError, EvalResult, VariableIssue},
    frame::Closure,
    introspect::{
        ClassBuilder, ClassDescriptor, CtorFn, DefaultStrategy, FunctorFn, GetterFn, HostObject, KeyedGetFn,
        KeyedSetFn, MethodFn, Permissions, ResolverKind, ResolverStrategy, SetterFn, downcast_host,
    },
    operators::{Operator, OverloadTable},
    options::Options,
    span::Span,
    template::Template,
    tree::Features,
    value::{IntRange, MapKey, Shape, Value, ValueMap, ValueSet},
};
