//! The runtime support table.
//!
//! For every IR operation that lowers to a call into the interpreter
//! runtime, this module records the callee's signature: the argument types,
//! the return type, and the behavior flags generic lowering and the
//! downstream assembler need. The original dispatch over the runtime's
//! C++ signatures becomes one static table keyed by opcode; entries are
//! constant expressions.

use crate::ir::operation::OpKind;
use crate::ir::types::Type;

/// Argument and return classification of runtime routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentType {
    Invalid,
    Engine,
    Frame,
    Function,
    ValueRef,
    ValueArray,
    ReturnedValue,
    Int,
    Bool,
    Void,
}

/// Identity of a runtime routine. The assembler resolves this to the
/// routine's address; the compiler core only needs the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeRoutine {
    ThrowException,
    ThrowReferenceError,
    CompareEqual,
    CompareGreaterThan,
    CompareGreaterEqual,
    CompareLessThan,
    CompareLessEqual,
    CompareStrictEqual,
    BitAnd,
    BitOr,
    BitXor,
    UShr,
    Shr,
    Shl,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    ToBoolean,
    ToObject,
    UMinus,
    ToNumber,
    LoadName,
    LoadElement,
    StoreElement,
    GetLookup,
    SetLookupStrict,
    SetLookupSloppy,
    LoadProperty,
    StoreProperty,
    LoadGlobalLookup,
    StoreNameSloppy,
    StoreNameStrict,
    LoadSuperProperty,
    StoreSuperProperty,
    Closure,
    GetIterator,
    IteratorNext,
    IteratorNextForYieldStar,
    IteratorClose,
    DeleteProperty,
    DeleteName,
    In,
    Instanceof,
    TypeofName,
    TypeofValue,
    DeclareVar,
    DestructureRestElement,
    ConvertThisToObject,
    CreateMappedArgumentsObject,
    CreateUnmappedArgumentsObject,
    CreateRestParameter,
    LoadSuperConstructor,
    ThrowOnNullOrUndefined,
    PushCallContext,
    PushCatchContext,
    PushWithContext,
    PushBlockContext,
    CloneBlockContext,
    PushScriptContext,
    PopScriptContext,
    RegexpLiteral,
    GetTemplateObject,
    CallName,
    CallValue,
    CallElement,
    CallPropertyLookup,
    CallProperty,
    CallGlobalLookup,
    CallPossiblyDirectEval,
    CallWithReceiver,
    ObjectLiteral,
    ArrayLiteral,
    CallWithSpread,
    Construct,
    ConstructWithSpread,
    TailCall,
    CreateClass,
}

/// One runtime routine's metadata.
#[derive(Debug)]
pub struct RuntimeMethod {
    pub routine: RuntimeRoutine,
    pub args: &'static [ArgumentType],
    pub ret: ArgumentType,
    pub pure: bool,
    pub throws: bool,
    pub changes_context: bool,
    pub last_argument_is_output_value: bool,
}

macro_rules! method {
    ($routine:ident, [$($arg:ident),*], $ret:ident
     $(, pure = $pure:expr)? $(, throws = $throws:expr)?
     $(, changes_context = $ctx:expr)? $(, out_last = $out:expr)?) => {
        {
            const RESULT: RuntimeMethod = RuntimeMethod {
                routine: RuntimeRoutine::$routine,
                args: &[$(ArgumentType::$arg),*],
                ret: ArgumentType::$ret,
                pure: false $(|| $pure)?,
                throws: false $(|| $throws)?,
                changes_context: false $(|| $ctx)?,
                last_argument_is_output_value: false $(|| $out)?,
            };
            Some(&RESULT)
        }
    };
}

/// Look up the runtime method a graph operation lowers to, if it is a
/// runtime call at all.
pub fn method_for(kind: OpKind) -> Option<&'static RuntimeMethod> {
    use OpKind as K;

    match kind {
        K::Throw => method!(ThrowException, [Engine, ValueRef], Void, throws = true),
        K::ThrowReferenceError => {
            method!(ThrowReferenceError, [Engine, Int], Void, throws = true)
        }

        K::JsEqual => method!(CompareEqual, [ValueRef, ValueRef], Bool, throws = true),
        K::JsGreaterThan => method!(CompareGreaterThan, [ValueRef, ValueRef], Bool, throws = true),
        K::JsGreaterEqual => {
            method!(CompareGreaterEqual, [ValueRef, ValueRef], Bool, throws = true)
        }
        K::JsLessThan => method!(CompareLessThan, [ValueRef, ValueRef], Bool, throws = true),
        K::JsLessEqual => method!(CompareLessEqual, [ValueRef, ValueRef], Bool, throws = true),
        K::JsStrictEqual => method!(CompareStrictEqual, [ValueRef, ValueRef], Bool, throws = true),

        K::JsBitAnd => method!(BitAnd, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsBitOr => method!(BitOr, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsBitXor => method!(BitXor, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsUnsignedShiftRight => {
            method!(UShr, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true)
        }
        K::JsShiftRight => method!(Shr, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsShiftLeft => method!(Shl, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),

        K::JsAdd => method!(Add, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsSubtract => method!(Sub, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsMultiply => method!(Mul, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsDivide => method!(Div, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsModulo => method!(Mod, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsExponentiate => {
            method!(Exp, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true)
        }

        K::ToBoolean => method!(ToBoolean, [ValueRef], Bool, pure = true),
        K::ToObject => method!(ToObject, [Engine, ValueRef], ReturnedValue, throws = true),

        K::JsNegate => method!(UMinus, [Engine, ValueRef], ReturnedValue, throws = true),
        K::JsToNumber => method!(ToNumber, [Engine, ValueRef], ReturnedValue, throws = true),

        K::JsLoadName => method!(LoadName, [Engine, Int], ReturnedValue, throws = true),
        K::JsLoadElement => {
            method!(LoadElement, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true)
        }
        K::JsStoreElement => {
            method!(StoreElement, [Engine, ValueRef, ValueRef, ValueRef], Void, throws = true)
        }
        K::JsGetLookup => {
            method!(GetLookup, [Engine, Function, ValueRef, Int], ReturnedValue, throws = true)
        }
        K::JsSetLookupStrict => {
            method!(SetLookupStrict, [Function, ValueRef, Int, ValueRef], Void, throws = true)
        }
        K::JsSetLookupSloppy => {
            method!(SetLookupSloppy, [Function, ValueRef, Int, ValueRef], Void, throws = true)
        }
        K::JsLoadProperty => {
            method!(LoadProperty, [Engine, ValueRef, Int], ReturnedValue, throws = true)
        }
        K::JsStoreProperty => {
            method!(StoreProperty, [Engine, ValueRef, Int, ValueRef], Void, throws = true)
        }
        K::JsLoadGlobalLookup => {
            method!(LoadGlobalLookup, [Engine, Function, Int], ReturnedValue, throws = true)
        }
        K::JsStoreNameSloppy => {
            method!(StoreNameSloppy, [Engine, Int, ValueRef], Void, throws = true)
        }
        K::JsStoreNameStrict => {
            method!(StoreNameStrict, [Engine, Int, ValueRef], Void, throws = true)
        }
        K::JsLoadSuperProperty => {
            method!(LoadSuperProperty, [Engine, ValueRef], ReturnedValue, throws = true)
        }
        K::JsStoreSuperProperty => {
            method!(StoreSuperProperty, [Engine, ValueRef, ValueRef], Void, throws = true)
        }
        K::JsLoadClosure => method!(Closure, [Engine, Int], ReturnedValue),
        K::JsGetIterator => {
            method!(GetIterator, [Engine, ValueRef, Int], ReturnedValue, throws = true)
        }

        // iterator advancing writes through its last argument; exception
        // checks are emitted separately by the graph builder
        K::JsIteratorNext => method!(
            IteratorNext,
            [Engine, ValueRef, ValueArray],
            ReturnedValue,
            throws = true,
            out_last = true
        ),
        K::JsIteratorNextForYieldStar => method!(
            IteratorNextForYieldStar,
            [Engine, ValueRef, ValueRef, ValueArray],
            ReturnedValue,
            throws = true,
            out_last = true
        ),

        K::JsIteratorClose => {
            method!(IteratorClose, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true)
        }
        K::JsDeleteProperty => method!(
            DeleteProperty,
            [Engine, Function, ValueRef, ValueRef],
            ReturnedValue,
            throws = true
        ),
        K::JsDeleteName => {
            method!(DeleteName, [Engine, Function, Int], ReturnedValue, throws = true)
        }
        K::JsIn => method!(In, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true),
        K::JsInstanceOf => {
            method!(Instanceof, [Engine, ValueRef, ValueRef], ReturnedValue, throws = true)
        }

        K::JsTypeofName => method!(TypeofName, [Engine, Int], ReturnedValue),
        K::JsTypeofValue => method!(TypeofValue, [Engine, ValueRef], ReturnedValue, pure = true),
        K::JsDeclareVar => {
            method!(DeclareVar, [Engine, Bool, Int], ReturnedValue, throws = true)
        }
        K::JsDestructureRestElement => {
            method!(DestructureRestElement, [Engine, ValueRef], ReturnedValue, throws = true)
        }
        K::JsThisToObject => {
            method!(ConvertThisToObject, [Engine, ValueRef], ReturnedValue, throws = true)
        }
        K::JsCreateMappedArgumentsObject => {
            method!(CreateMappedArgumentsObject, [Engine], ReturnedValue)
        }
        K::JsCreateUnmappedArgumentsObject => {
            method!(CreateUnmappedArgumentsObject, [Engine], ReturnedValue)
        }
        K::JsCreateRestParameter => {
            method!(CreateRestParameter, [Engine, Int], ReturnedValue, pure = true)
        }
        K::JsLoadSuperConstructor => {
            method!(LoadSuperConstructor, [Engine, ValueRef], ReturnedValue, throws = true)
        }
        K::JsThrowOnNullOrUndefined => {
            method!(ThrowOnNullOrUndefined, [Engine, ValueRef], Void, throws = true)
        }

        K::JsCreateCallContext => {
            method!(PushCallContext, [Frame], Void, changes_context = true)
        }
        K::JsCreateCatchContext => {
            method!(PushCatchContext, [Engine, Int, Int], Void, changes_context = true)
        }
        K::JsCreateWithContext => method!(
            PushWithContext,
            [Engine, ValueRef],
            ReturnedValue,
            changes_context = true
        ),
        K::JsCreateBlockContext => {
            method!(PushBlockContext, [Engine, Int], Void, changes_context = true)
        }
        K::JsCloneBlockContext => {
            method!(CloneBlockContext, [Engine], Void, changes_context = true)
        }
        K::JsCreateScriptContext => {
            method!(PushScriptContext, [Engine, Int], Void, changes_context = true)
        }
        K::JsPopScriptContext => {
            method!(PopScriptContext, [Engine], ReturnedValue, changes_context = true)
        }

        K::LoadRegExp => method!(RegexpLiteral, [Engine, Int], ReturnedValue, pure = true),
        K::JsGetTemplateObject => {
            method!(GetTemplateObject, [Function, Int], ReturnedValue, pure = true)
        }

        K::JsCallName => {
            method!(CallName, [Engine, Int, ValueArray, Int], ReturnedValue, throws = true)
        }
        K::JsCallValue => {
            method!(CallValue, [Engine, ValueRef, ValueArray, Int], ReturnedValue, throws = true)
        }
        K::JsCallElement => method!(
            CallElement,
            [Engine, ValueRef, ValueRef, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsCallLookup => method!(
            CallPropertyLookup,
            [Engine, ValueRef, Int, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsCallProperty => method!(
            CallProperty,
            [Engine, ValueRef, Int, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsCallGlobalLookup => method!(
            CallGlobalLookup,
            [Engine, Int, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsCallPossiblyDirectEval => method!(
            CallPossiblyDirectEval,
            [Engine, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsCallWithReceiver => method!(
            CallWithReceiver,
            [Engine, ValueRef, ValueRef, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsDefineObjectLiteral => method!(
            ObjectLiteral,
            [Engine, Int, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsDefineArray => {
            method!(ArrayLiteral, [Engine, ValueArray, Int], ReturnedValue, throws = true)
        }
        K::JsCallWithSpread => method!(
            CallWithSpread,
            [Engine, ValueRef, ValueRef, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsConstruct => method!(
            Construct,
            [Engine, ValueRef, ValueRef, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsConstructWithSpread => method!(
            ConstructWithSpread,
            [Engine, ValueRef, ValueRef, ValueArray, Int],
            ReturnedValue,
            throws = true
        ),
        K::JsTailCall => method!(
            TailCall,
            [ValueRef, ValueRef, ValueRef, ValueRef],
            Void,
            throws = true
        ),
        K::JsCreateClass => method!(
            CreateClass,
            [Engine, Int, ValueRef, ValueArray],
            ReturnedValue,
            throws = true
        ),

        _ => None,
    }
}

/// Whether a graph operation is a call into the runtime.
pub fn is_runtime_call(kind: OpKind) -> bool {
    method_for(kind).is_some()
}

fn method(kind: OpKind) -> &'static RuntimeMethod {
    method_for(kind).unwrap_or_else(|| panic!("{:?} is not a runtime call", kind))
}

/// Number of arguments of the lowered call, leading engine/function/frame
/// arguments included.
pub fn argc(kind: OpKind) -> usize {
    method(kind).args.len()
}

/// The type of the runtime argument at `arg`, or `Invalid` past the end.
pub fn argument_type(kind: OpKind, arg: usize) -> ArgumentType {
    method(kind).args.get(arg).copied().unwrap_or(ArgumentType::Invalid)
}

fn translate_type(t: ArgumentType) -> Type {
    match t {
        ArgumentType::Int => Type::int32(),
        ArgumentType::Bool => Type::boolean(),
        ArgumentType::Void => Type::none(),
        ArgumentType::Engine => Type::raw_pointer(),
        ArgumentType::ValueRef | ArgumentType::ValueArray | ArgumentType::ReturnedValue => {
            Type::any()
        }
        ArgumentType::Invalid | ArgumentType::Frame | ArgumentType::Function => {
            panic!("{:?} is not a value type", t)
        }
    }
}

/// The IR type of the call's result.
pub fn return_type(kind: OpKind) -> Type {
    if kind == OpKind::JsTailCall {
        return Type::none();
    }
    translate_type(method(kind).ret)
}

/// Whether the value passed at runtime-argument position `arg` has to be
/// materialized on the JS stack. Reference arguments need a stack home for
/// constants and for anything unboxed; array arguments always live there.
pub fn needs_storage_on_js_stack(
    kind: OpKind,
    arg: usize,
    input_is_constant: bool,
    node_type: Type,
) -> bool {
    let arg_ty = argument_type(kind, arg);
    if arg_ty == ArgumentType::ValueArray {
        return true;
    }
    if arg_ty != ArgumentType::ValueRef {
        return false;
    }
    if input_is_constant {
        return true;
    }
    !node_type.is_object() && !node_type.is_raw_pointer() && !node_type.is_any()
}

/// Index of the first vararg in the graph node's value inputs.
///
/// The runtime signature's leading engine argument is not present in the
/// graph before lowering, hence the offset by one.
pub fn var_args_start(kind: OpKind) -> usize {
    if kind == OpKind::JsTailCall {
        // function and this object precede the arguments
        return 2;
    }
    let pos = method(kind)
        .args
        .iter()
        .position(|&t| t == ArgumentType::ValueArray)
        .expect("not a vararg call");
    pos - 1
}

pub fn is_var_args_call(kind: OpKind) -> bool {
    if kind == OpKind::JsTailCall {
        return true;
    }
    let Some(m) = method_for(kind) else {
        return false;
    };
    if m.last_argument_is_output_value {
        return false;
    }
    m.args.contains(&ArgumentType::ValueArray)
}

pub fn last_argument_is_output_value(kind: OpKind) -> bool {
    method(kind).last_argument_is_output_value
}

pub fn changes_context(kind: OpKind) -> bool {
    method(kind).changes_context
}

pub fn is_pure(kind: OpKind) -> bool {
    method(kind).pure
}

/// Whether the lowered call can transfer control to an exception edge.
///
/// `Throw`/`ThrowReferenceError` are already linked to the handler, and the
/// iterator-advance routines get explicit exception checks from the graph
/// builder; all of these are modeled as non-throwing.
pub fn can_throw(kind: OpKind) -> bool {
    match kind {
        OpKind::Throw | OpKind::ThrowReferenceError => false,
        OpKind::JsIteratorNext | OpKind::JsIteratorNextForYieldStar => false,
        _ => method(kind).throws,
    }
}

pub fn takes_engine_as_arg(kind: OpKind, arg: usize) -> bool {
    argument_type(kind, arg) == ArgumentType::Engine
}

pub fn takes_function_as_arg(kind: OpKind, arg: usize) -> bool {
    argument_type(kind, arg) == ArgumentType::Function
}

pub fn takes_frame_as_arg(kind: OpKind, arg: usize) -> bool {
    argument_type(kind, arg) == ArgumentType::Frame
}

/// The routine identity the assembler binds to an address.
pub fn routine(kind: OpKind) -> RuntimeRoutine {
    method(kind).routine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_call_classification() {
        assert!(is_runtime_call(OpKind::JsAdd));
        assert!(is_runtime_call(OpKind::JsCallName));
        assert!(is_runtime_call(OpKind::Throw));
        assert!(!is_runtime_call(OpKind::Region));
        assert!(!is_runtime_call(OpKind::ScopedLoad));
        assert!(!is_runtime_call(OpKind::GetException));
    }

    #[test]
    fn test_vararg_detection() {
        assert!(is_var_args_call(OpKind::JsCallName));
        assert!(is_var_args_call(OpKind::JsTailCall));
        assert!(is_var_args_call(OpKind::JsCreateClass));
        // the output-value array of the iterator routines is not varargs
        assert!(!is_var_args_call(OpKind::JsIteratorNext));
        assert!(!is_var_args_call(OpKind::JsAdd));
    }

    #[test]
    fn test_var_args_start() {
        // CallName(engine, name, argv, argc): argv at runtime position 2,
        // graph value input 1.
        assert_eq!(var_args_start(OpKind::JsCallName), 1);
        // CallWithReceiver(engine, func, this, argv, argc)
        assert_eq!(var_args_start(OpKind::JsCallWithReceiver), 2);
        assert_eq!(var_args_start(OpKind::JsTailCall), 2);
    }

    #[test]
    fn test_leading_argument_queries() {
        assert!(takes_engine_as_arg(OpKind::JsAdd, 0));
        assert!(!takes_engine_as_arg(OpKind::JsEqual, 0));
        assert!(takes_function_as_arg(OpKind::JsGetTemplateObject, 0));
        assert!(takes_function_as_arg(OpKind::JsLoadGlobalLookup, 1));
        assert!(takes_frame_as_arg(OpKind::JsCreateCallContext, 0));
    }

    #[test]
    fn test_throw_special_cases() {
        assert!(!can_throw(OpKind::Throw));
        assert!(!can_throw(OpKind::ThrowReferenceError));
        assert!(!can_throw(OpKind::JsIteratorNext));
        assert!(!can_throw(OpKind::JsIteratorNextForYieldStar));
        assert!(can_throw(OpKind::JsAdd));
        assert!(!can_throw(OpKind::JsLoadClosure));
    }

    #[test]
    fn test_js_stack_storage() {
        // constants passed by reference need a stack home
        assert!(needs_storage_on_js_stack(OpKind::JsAdd, 1, true, Type::int32()));
        // unboxed values too
        assert!(needs_storage_on_js_stack(OpKind::JsAdd, 1, false, Type::boolean()));
        // boxed any-typed values are passed directly
        assert!(!needs_storage_on_js_stack(OpKind::JsAdd, 1, false, Type::any()));
        // int arguments are never materialized
        assert!(!needs_storage_on_js_stack(OpKind::JsLoadName, 1, true, Type::int32()));
        // array arguments always are
        assert!(needs_storage_on_js_stack(OpKind::JsIteratorNext, 2, false, Type::any()));
    }

    #[test]
    fn test_table_is_arity_consistent() {
        // For every runtime-callable operation with interned graph arities,
        // the table argument count must equal the graph's value inputs plus
        // the leading engine/function/frame arguments.
        use crate::ir::operation::OperationBuilder;
        let b = OperationBuilder::new();
        for &kind in OpKind::ALL {
            let Some(m) = method_for(kind) else { continue };
            if is_var_args_call(kind) || kind == OpKind::Call {
                continue;
            }
            let op = b.get(kind);
            let leading = m
                .args
                .iter()
                .take_while(|a| {
                    matches!(
                        a,
                        ArgumentType::Engine | ArgumentType::Function | ArgumentType::Frame
                    )
                })
                .count();
            assert_eq!(
                m.args.len(),
                leading + op.value_input_count(),
                "argument count mismatch for {:?}",
                kind
            );
            // purity and effect arity must agree, or lowering would build
            // calls with dangling or missing effect inputs
            assert_eq!(m.pure, op.effect_input_count() == 0, "purity mismatch for {:?}", kind);
            // a control input on the graph side requires one on the call
            let call_controls = can_throw(kind)
                || m.changes_context
                || matches!(
                    kind,
                    OpKind::Throw
                        | OpKind::ThrowReferenceError
                        | OpKind::JsIteratorNext
                        | OpKind::JsIteratorNextForYieldStar
                );
            assert_eq!(
                op.control_input_count() > 0,
                call_controls,
                "control arity mismatch for {:?}",
                kind
            );
        }
    }
}
