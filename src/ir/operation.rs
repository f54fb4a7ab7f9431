//! Operations: interned descriptors of what a node does.
//!
//! An operation carries the opcode, the arity per edge kind (value, effect,
//! control, plus an optional frame-state input), the result type, flags and
//! an optional payload. Two nodes may share one operation; `1 + 2` and
//! `3 + 4` are two nodes with the same `JsAdd` operation.
//!
//! Payload-free operations are interned once per process in a lazily
//! installed table; payload-carrying operations are created per function
//! through [`OperationBuilder`]. Both are handed out as `Arc<Operation>`.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::bytecode::Value;
use crate::runtime;

use super::types::Type;
use super::StringId;

macro_rules! op_kinds {
    ($($name:ident,)*) => {
        /// The closed opcode enumeration of the IR.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum OpKind {
            $($name,)*
        }

        impl OpKind {
            pub const ALL: &'static [OpKind] = &[$(OpKind::$name,)*];
        }
    };
}

op_kinds! {
    FrameState,
    Start,
    End,

    Undefined,
    Constant,
    Parameter,
    Empty,
    Engine,
    CppFrame,
    Function,

    Jump,
    Return,
    JsTailCall,
    TailCall,
    Branch,
    IfTrue,
    IfFalse,
    Region,
    OnException,
    Phi,
    EffectPhi,
    SelectOutput,
    UnwindDispatch,
    UnwindToLabel,
    HandleUnwind,
    Throw,
    ThrowReferenceError,

    Call,

    LoadRegExp,
    ScopedLoad,
    ScopedStore,

    JsLoadElement,
    JsStoreElement,
    JsGetLookup,
    JsSetLookupStrict,
    JsSetLookupSloppy,
    JsLoadProperty,
    JsStoreProperty,
    JsLoadName,
    JsLoadGlobalLookup,
    JsStoreNameSloppy,
    JsStoreNameStrict,
    JsLoadSuperProperty,
    JsStoreSuperProperty,
    JsLoadClosure,
    JsGetIterator,
    JsIteratorNext,
    JsIteratorNextForYieldStar,
    JsIteratorClose,
    JsDeleteProperty,
    JsDeleteName,
    JsIn,
    JsInstanceOf,
    // QML object operations; treated like the JS ones throughout
    QmlLoadScopeObjectProperty,
    QmlStoreScopeObjectProperty,
    QmlLoadContextObjectProperty,
    QmlStoreContextObjectProperty,
    QmlLoadIdObject,

    JsEqual,
    JsGreaterThan,
    JsGreaterEqual,
    JsLessThan,
    JsLessEqual,
    JsStrictEqual,

    JsAdd,
    JsSubtract,
    JsMultiply,
    JsDivide,
    JsModulo,
    JsExponentiate,

    JsBitAnd,
    JsBitOr,
    JsBitXor,
    JsUnsignedShiftRight,
    JsShiftRight,
    JsShiftLeft,

    JsNegate,
    JsToNumber,

    JsCallName,
    JsCallValue,
    JsCallElement,
    JsCallProperty,
    JsCallLookup,
    JsCallGlobalLookup,
    JsCallPossiblyDirectEval,
    JsCallWithReceiver,
    JsCallWithSpread,
    JsDefineObjectLiteral,
    JsDefineArray,
    JsCreateClass,
    JsConstruct,
    JsConstructWithSpread,
    // QML vararg calls; treated like the JS ones throughout
    QmlCallScopeObjectProperty,
    QmlCallContextObjectProperty,

    JsTypeofName,
    JsTypeofValue,
    JsDeclareVar,
    JsDestructureRestElement,
    QmlLoadContext,
    QmlLoadImportedScripts,
    JsThisToObject,
    JsCreateMappedArgumentsObject,
    JsCreateUnmappedArgumentsObject,
    JsCreateRestParameter,
    JsLoadSuperConstructor,
    JsThrowOnNullOrUndefined,
    JsGetTemplateObject,
    StoreThis,

    JsCreateCallContext,
    JsCreateCatchContext,
    JsCreateWithContext,
    JsCreateBlockContext,
    JsCloneBlockContext,
    JsCreateScriptContext,
    JsPopScriptContext,
    PopContext,

    GetException,
    SetException,

    ToObject,
    ToBoolean,

    IsEmpty,

    Alloca,
    VaAlloc,
    VaStore,
    VaSeal,

    BooleanNot,
    HasException,

    // Low level, used by the register and stack allocators
    Swap,
    Move,
}

/// Operation flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags(u8);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    pub const THROWS: OpFlags = OpFlags(1 << 0);
    /// No read/write side effect, cannot throw, and is idempotent.
    pub const PURE: OpFlags = OpFlags(1 << 1);
    pub const NEEDS_BYTECODE_OFFSETS: OpFlags = OpFlags(1 << 2);
    pub const CAN_THROW: OpFlags = OpFlags(1 << 0 | 1 << 2);
    pub const HAS_FRAME_STATE_INPUT: OpFlags = OpFlags(1 << 3);

    #[inline]
    pub fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpFlags {
    type Output = OpFlags;

    fn bitor(self, other: OpFlags) -> OpFlags {
        OpFlags(self.0 | other.0)
    }
}

/// Payload data for the operation kinds that carry any.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Constant(Value),
    Parameter { index: usize, name: StringId },
    Call { callee: OpKind },
    UnwindDispatch { unwind_handler_offset: i32, fallthrough_offset: i32 },
    HandleUnwind { unwind_handler_offset: i32 },
}

/// A shared operation. See the module docs.
pub struct Operation {
    kind: OpKind,
    in_value: u16,
    in_effect: u16,
    in_control: u16,
    out_value: u16,
    out_effect: u16,
    out_control: u16,
    typ: Type,
    flags: OpFlags,
    payload: Payload,
}

/// How operations are passed around.
pub type OpRef = Arc<Operation>;

impl Operation {
    #[allow(clippy::too_many_arguments)]
    fn new(
        kind: OpKind,
        in_value: u16,
        in_effect: u16,
        in_control: u16,
        out_value: u16,
        out_effect: u16,
        out_control: u16,
        typ: Type,
        flags: OpFlags,
    ) -> OpRef {
        Arc::new(Operation {
            kind,
            in_value,
            in_effect,
            in_control,
            out_value,
            out_effect,
            out_control,
            typ,
            flags,
            payload: Payload::None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn with_payload(
        kind: OpKind,
        in_value: u16,
        in_effect: u16,
        in_control: u16,
        out_value: u16,
        out_effect: u16,
        out_control: u16,
        typ: Type,
        flags: OpFlags,
        payload: Payload,
    ) -> OpRef {
        Arc::new(Operation {
            kind,
            in_value,
            in_effect,
            in_control,
            out_value,
            out_effect,
            out_control,
            typ,
            flags,
            payload,
        })
    }

    #[inline]
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, OpKind::Undefined | OpKind::Constant | OpKind::Empty)
    }

    #[inline]
    pub fn value_input_count(&self) -> usize {
        self.in_value as usize
    }

    #[inline]
    pub fn effect_input_count(&self) -> usize {
        self.in_effect as usize
    }

    #[inline]
    pub fn control_input_count(&self) -> usize {
        self.in_control as usize
    }

    #[inline]
    pub fn value_output_count(&self) -> usize {
        self.out_value as usize
    }

    #[inline]
    pub fn effect_output_count(&self) -> usize {
        self.out_effect as usize
    }

    #[inline]
    pub fn control_output_count(&self) -> usize {
        self.out_control as usize
    }

    #[inline]
    pub fn index_of_first_effect(&self) -> usize {
        self.value_input_count()
    }

    #[inline]
    pub fn index_of_first_control(&self) -> usize {
        self.value_input_count() + self.effect_input_count()
    }

    /// Slot index of the frame-state input, if the operation has one.
    pub fn index_of_frame_state_input(&self) -> Option<usize> {
        if self.has_frame_state_input() {
            Some(self.index_of_first_control() + self.control_input_count())
        } else {
            None
        }
    }

    #[inline]
    pub fn typ(&self) -> Type {
        self.typ
    }

    #[inline]
    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpFlags::THROWS)
    }

    #[inline]
    pub fn is_pure(&self) -> bool {
        self.flags.contains(OpFlags::PURE)
    }

    #[inline]
    pub fn needs_bytecode_offsets(&self) -> bool {
        self.flags.contains(OpFlags::NEEDS_BYTECODE_OFFSETS)
    }

    #[inline]
    pub fn has_frame_state_input(&self) -> bool {
        self.flags.contains(OpFlags::HAS_FRAME_STATE_INPUT)
    }

    pub fn total_input_count(&self) -> usize {
        self.value_input_count()
            + self.effect_input_count()
            + self.control_input_count()
            + usize::from(self.has_frame_state_input())
    }

    pub fn total_output_count(&self) -> usize {
        self.value_output_count() + self.effect_output_count() + self.control_output_count()
    }

    /// The constant payload, for `Constant` operations only. The dedicated
    /// `Undefined` operation answers through its own kind instead.
    pub fn constant_payload(&self) -> Option<&Value> {
        if self.kind != OpKind::Constant {
            return None;
        }
        match &self.payload {
            Payload::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn parameter_payload(&self) -> Option<(usize, StringId)> {
        match self.payload {
            Payload::Parameter { index, name } if self.kind == OpKind::Parameter => {
                Some((index, name))
            }
            _ => None,
        }
    }

    /// The runtime callee of a `Call` operation.
    pub fn call_payload(&self) -> Option<OpKind> {
        match self.payload {
            Payload::Call { callee } if self.kind == OpKind::Call => Some(callee),
            _ => None,
        }
    }

    pub fn unwind_dispatch_payload(&self) -> Option<(i32, i32)> {
        match self.payload {
            Payload::UnwindDispatch { unwind_handler_offset, fallthrough_offset }
                if self.kind == OpKind::UnwindDispatch =>
            {
                Some((unwind_handler_offset, fallthrough_offset))
            }
            _ => None,
        }
    }

    pub fn handle_unwind_payload(&self) -> Option<i32> {
        match self.payload {
            Payload::HandleUnwind { unwind_handler_offset }
                if self.kind == OpKind::HandleUnwind =>
            {
                Some(unwind_handler_offset)
            }
            _ => None,
        }
    }

    pub fn debug_string(&self) -> String {
        match (self.kind, &self.payload) {
            (OpKind::Constant, Payload::Constant(v)) => {
                format!("Constant[{}]", v.debug_string())
            }
            (OpKind::Parameter, Payload::Parameter { index, .. }) => {
                format!("Parameter[{}]", index)
            }
            (OpKind::Call, Payload::Call { callee }) => format!("Call[{:?}]", callee),
            (
                OpKind::UnwindDispatch,
                Payload::UnwindDispatch { unwind_handler_offset, fallthrough_offset },
            ) => format!("UnwindDispatch[{}, {}]", fallthrough_offset, unwind_handler_offset),
            (OpKind::HandleUnwind, Payload::HandleUnwind { unwind_handler_offset }) => {
                format!("HandleUnwind[{}]", unwind_handler_offset)
            }
            _ => format!("{:?}", self.kind),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

fn create_static_operation(kind: OpKind) -> Option<OpRef> {
    use OpKind as K;

    let none = Type::none;
    let any = Type::any;
    let number = Type::number;
    let boolean = Type::boolean;

    let get = |iv: u16, ie: u16, ic: u16, ov: u16, oe: u16, oc: u16, t: fn() -> Type, f: OpFlags| {
        Some(Operation::new(kind, iv, ie, ic, ov, oe, oc, t(), f))
    };

    const NO_FLAGS: OpFlags = OpFlags::NONE;
    const CAN_THROW: OpFlags = OpFlags::CAN_THROW;
    const PURE: OpFlags = OpFlags::PURE;

    match kind {
        K::Undefined => Some(Operation::with_payload(
            K::Undefined,
            0, 0, 0, 1, 0, 0,
            Type::undefined(),
            NO_FLAGS,
            Payload::Constant(Value::Undefined),
        )),
        // the cached empty value is an ordinary constant
        K::Empty => Some(Operation::with_payload(
            K::Constant,
            0, 0, 0, 1, 0, 0,
            Type::empty(),
            NO_FLAGS,
            Payload::Constant(Value::Empty),
        )),
        K::Engine =>                          get(1, 0, 0, 1, 0, 0, none, NO_FLAGS),
        K::CppFrame =>                        get(1, 0, 0, 1, 0, 0, none, NO_FLAGS),
        K::Function =>                        get(1, 0, 0, 1, 0, 0, none, NO_FLAGS),
        K::Jump =>                            get(0, 0, 1, 0, 0, 1, none, NO_FLAGS),
        K::Return =>                          get(1, 1, 1, 0, 0, 1, none, NO_FLAGS),
        K::Branch =>                          get(1, 0, 1, 0, 0, 2, none,
                                                  OpFlags::HAS_FRAME_STATE_INPUT | OpFlags::NEEDS_BYTECODE_OFFSETS),
        K::IfTrue =>                          get(0, 0, 1, 0, 0, 1, none, NO_FLAGS),
        K::IfFalse =>                         get(0, 0, 1, 0, 0, 1, none, NO_FLAGS),
        K::SelectOutput =>                    get(3, 1, 1, 1, 1, 1, any, NO_FLAGS),
        K::Throw =>                           get(1, 1, 1, 0, 1, 1, any, OpFlags::NEEDS_BYTECODE_OFFSETS),
        K::OnException =>                     get(0, 0, 1, 0, 0, 1, none, NO_FLAGS),
        K::ThrowReferenceError =>             get(1, 1, 1, 0, 1, 1, any, OpFlags::NEEDS_BYTECODE_OFFSETS),
        K::UnwindToLabel =>                   get(2, 1, 1, 0, 1, 1, none, NO_FLAGS),
        K::LoadRegExp =>                      get(1, 0, 0, 1, 0, 0, any, NO_FLAGS),
        K::ScopedLoad =>                      get(2, 1, 0, 1, 1, 0, any, NO_FLAGS),
        K::ScopedStore =>                     get(3, 1, 0, 0, 1, 0, none, NO_FLAGS),
        K::JsLoadElement =>                   get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsGetLookup =>                     get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsLoadProperty =>                  get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsStoreElement =>                  get(3, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::JsSetLookupStrict =>               get(3, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::JsSetLookupSloppy =>               get(3, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::JsStoreProperty =>                 get(3, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::JsLoadName =>                      get(1, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsLoadGlobalLookup =>              get(1, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsStoreNameSloppy =>               get(2, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::JsStoreNameStrict =>               get(2, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::JsLoadSuperProperty =>             get(1, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsStoreSuperProperty =>            get(2, 1, 1, 0, 1, 2, any, CAN_THROW),
        K::JsLoadClosure =>                   get(1, 1, 0, 1, 1, 0, any, PURE),
        K::JsGetIterator =>                   get(2, 1, 1, 1, 1, 2, any, CAN_THROW),

        // special case: exception checks are emitted separately by the
        // graph builder, so these are modeled as non-throwing
        K::JsIteratorNext =>                  get(2, 1, 1, 2, 1, 1, any, NO_FLAGS),
        K::JsIteratorNextForYieldStar =>      get(3, 1, 1, 2, 1, 1, any, NO_FLAGS),

        K::JsIteratorClose =>                 get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsDeleteProperty =>                get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsDeleteName =>                    get(1, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsIn =>                            get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsInstanceOf =>                    get(2, 1, 1, 1, 1, 2, any, CAN_THROW),

        K::QmlLoadScopeObjectProperty =>      get(3, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::QmlStoreScopeObjectProperty =>     get(3, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::QmlLoadContextObjectProperty =>    get(3, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::QmlStoreContextObjectProperty =>   get(3, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::QmlLoadIdObject =>                 get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::QmlLoadContext =>                  get(0, 1, 0, 1, 1, 0, any, NO_FLAGS),
        K::QmlLoadImportedScripts =>          get(0, 1, 0, 1, 1, 0, any, NO_FLAGS),

        K::JsEqual =>                         get(2, 1, 1, 1, 1, 2, boolean, CAN_THROW),
        K::JsGreaterThan =>                   get(2, 1, 1, 1, 1, 2, boolean, CAN_THROW),
        K::JsGreaterEqual =>                  get(2, 1, 1, 1, 1, 2, boolean, CAN_THROW),
        K::JsLessThan =>                      get(2, 1, 1, 1, 1, 2, boolean, CAN_THROW),
        K::JsLessEqual =>                     get(2, 1, 1, 1, 1, 2, boolean, CAN_THROW),
        K::JsStrictEqual =>                   get(2, 1, 1, 1, 1, 2, boolean, CAN_THROW),

        K::JsAdd =>                           get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsSubtract =>                      get(2, 1, 1, 1, 1, 2, number, CAN_THROW),
        K::JsMultiply =>                      get(2, 1, 1, 1, 1, 2, number, CAN_THROW),
        K::JsDivide =>                        get(2, 1, 1, 1, 1, 2, number, CAN_THROW),
        K::JsModulo =>                        get(2, 1, 1, 1, 1, 2, number, CAN_THROW),
        K::JsExponentiate =>                  get(2, 1, 1, 1, 1, 2, number, CAN_THROW),

        K::JsBitAnd =>                        get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsBitOr =>                         get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsBitXor =>                        get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsUnsignedShiftRight =>            get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsShiftRight =>                    get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsShiftLeft =>                     get(2, 1, 1, 1, 1, 2, any, CAN_THROW),

        K::JsNegate =>                        get(1, 1, 1, 1, 1, 2, number, CAN_THROW),
        K::JsToNumber =>                      get(1, 1, 1, 1, 1, 2, number, CAN_THROW),
        K::Alloca =>                          get(1, 0, 0, 1, 0, 0, none, NO_FLAGS),

        K::VaAlloc =>                         get(1, 1, 0, 1, 1, 0, none, NO_FLAGS),
        K::VaStore =>                         get(3, 0, 0, 1, 0, 0, none, NO_FLAGS),

        K::JsTypeofName =>                    get(1, 1, 0, 1, 1, 0, any, NO_FLAGS),
        K::JsTypeofValue =>                   get(1, 0, 0, 1, 0, 0, any, PURE),
        K::JsDeclareVar =>                    get(2, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::JsDestructureRestElement =>        get(1, 1, 1, 1, 1, 2, any, CAN_THROW),

        K::JsCreateCallContext =>             get(0, 1, 1, 0, 1, 1, none, NO_FLAGS),
        K::JsCreateCatchContext =>            get(2, 1, 1, 1, 1, 1, none, NO_FLAGS),
        K::JsCreateWithContext =>             get(1, 1, 1, 1, 1, 1, any, NO_FLAGS),
        K::JsCreateBlockContext =>            get(1, 1, 1, 1, 1, 1, none, NO_FLAGS),
        K::JsCloneBlockContext =>             get(0, 1, 1, 0, 1, 1, none, NO_FLAGS),
        K::JsCreateScriptContext =>           get(1, 1, 1, 1, 1, 1, none, NO_FLAGS),
        K::JsPopScriptContext =>              get(0, 1, 1, 1, 1, 1, none, NO_FLAGS),
        K::PopContext =>                      get(0, 1, 1, 0, 1, 1, none, NO_FLAGS),

        K::JsThisToObject =>                  get(1, 1, 1, 0, 1, 2, any, NO_FLAGS),
        K::JsCreateMappedArgumentsObject =>   get(0, 1, 0, 1, 1, 0, any, NO_FLAGS),
        K::JsCreateUnmappedArgumentsObject => get(0, 1, 0, 1, 1, 0, any, NO_FLAGS),
        K::JsCreateRestParameter =>           get(1, 0, 0, 1, 0, 0, any, NO_FLAGS),
        K::JsLoadSuperConstructor =>          get(1, 1, 1, 1, 1, 2, any, NO_FLAGS),
        K::JsThrowOnNullOrUndefined =>        get(1, 1, 1, 0, 1, 2, none, CAN_THROW),
        K::JsGetTemplateObject =>             get(1, 0, 0, 1, 0, 0, any, NO_FLAGS),
        K::StoreThis =>                       get(1, 1, 0, 1, 1, 0, any, NO_FLAGS),

        K::GetException =>                    get(0, 1, 0, 1, 1, 0, any, NO_FLAGS),
        K::SetException =>                    get(1, 1, 0, 0, 1, 0, any, NO_FLAGS),

        K::ToObject =>                        get(1, 1, 1, 1, 1, 2, any, CAN_THROW),
        K::ToBoolean =>                       get(1, 0, 0, 1, 0, 0, boolean, PURE),

        K::IsEmpty =>                         get(1, 0, 0, 1, 0, 0, boolean, PURE),

        K::BooleanNot =>                      get(1, 0, 0, 1, 0, 0, boolean, NO_FLAGS),
        K::HasException =>                    get(1, 1, 0, 1, 1, 0, boolean, NO_FLAGS),

        K::Swap =>                            get(0, 0, 0, 0, 0, 0, none, NO_FLAGS),
        K::Move =>                            get(1, 0, 0, 1, 0, 0, none, NO_FLAGS),

        // everything else carries a payload or a per-site arity
        _ => None,
    }
}

/// The process-wide interned table of payload-free operations. Installed
/// once on first use; reads are lock-free afterwards.
fn static_operation(kind: OpKind) -> Option<OpRef> {
    static OPS: OnceLock<Vec<Option<OpRef>>> = OnceLock::new();
    let ops = OPS.get_or_init(|| {
        OpKind::ALL
            .iter()
            .map(|&k| create_static_operation(k))
            .collect()
    });
    ops[kind as usize].clone()
}

/// Creates operations for one function's graph.
///
/// Static operations are shared from the interned table; payload-carrying
/// ones are allocated here. The frame-state operation is cached because all
/// frame states of one function have the same arity.
#[derive(Default)]
pub struct OperationBuilder {
    op_frame_state: Option<OpRef>,
}

impl OperationBuilder {
    pub fn new() -> OperationBuilder {
        OperationBuilder { op_frame_state: None }
    }

    /// Look up an interned, payload-free operation.
    pub fn get(&self, kind: OpKind) -> OpRef {
        static_operation(kind)
            .unwrap_or_else(|| panic!("operation {:?} needs a payload or explicit arity", kind))
    }

    pub fn get_constant(&self, v: Value) -> OpRef {
        let t = v.type_of();
        Operation::with_payload(
            OpKind::Constant,
            0, 0, 0, 1, 0, 0,
            t,
            OpFlags::NONE,
            Payload::Constant(v),
        )
    }

    pub fn get_param(&self, index: usize, name: StringId) -> OpRef {
        Operation::with_payload(
            OpKind::Parameter,
            1, 0, 0, 1, 0, 0,
            Type::any(),
            OpFlags::NONE,
            Payload::Parameter { index, name },
        )
    }

    pub fn get_region(&self, n_control_inputs: usize) -> OpRef {
        Operation::new(
            OpKind::Region,
            0, 0, n_control_inputs as u16,
            0, 0, 1,
            Type::none(),
            OpFlags::NONE,
        )
    }

    pub fn get_phi(&self, n_value_inputs: usize) -> OpRef {
        Operation::new(
            OpKind::Phi,
            n_value_inputs as u16, 0, 1,
            1, 0, 0,
            Type::any(),
            OpFlags::NONE,
        )
    }

    pub fn get_effect_phi(&self, n_effect_inputs: usize) -> OpRef {
        Operation::new(
            OpKind::EffectPhi,
            0, n_effect_inputs as u16, 1,
            0, 1, 0,
            Type::none(),
            OpFlags::NONE,
        )
    }

    pub fn get_unwind_dispatch(
        &self,
        n_continuations: usize,
        unwind_handler_offset: i32,
        fallthrough_offset: i32,
    ) -> OpRef {
        Operation::with_payload(
            OpKind::UnwindDispatch,
            0, 1, 1,
            0, n_continuations as u16, n_continuations as u16,
            Type::none(),
            OpFlags::NONE,
            Payload::UnwindDispatch { unwind_handler_offset, fallthrough_offset },
        )
    }

    pub fn get_handle_unwind(&self, unwind_handler_offset: i32) -> OpRef {
        Operation::with_payload(
            OpKind::HandleUnwind,
            0, 1, 1, 0, 1, 1,
            Type::none(),
            OpFlags::NONE,
            Payload::HandleUnwind { unwind_handler_offset },
        )
    }

    pub fn get_frame_state(&mut self, frame_size: usize) -> OpRef {
        match &self.op_frame_state {
            Some(op) => {
                assert_eq!(op.value_input_count(), frame_size);
                op.clone()
            }
            None => {
                let op = Operation::new(
                    OpKind::FrameState,
                    frame_size as u16, 0, 0, 0, 0, 1,
                    Type::none(),
                    OpFlags::NONE,
                );
                self.op_frame_state = Some(op.clone());
                op
            }
        }
    }

    pub fn get_start(&self, output_count: usize) -> OpRef {
        Operation::new(
            OpKind::Start,
            0, 0, 0,
            output_count as u16, 1, 1,
            Type::none(),
            OpFlags::NONE,
        )
    }

    pub fn get_end(&self, control_input_count: usize) -> OpRef {
        Operation::new(
            OpKind::End,
            0, 0, control_input_count as u16,
            0, 0, 0,
            Type::none(),
            OpFlags::NONE,
        )
    }

    pub fn get_js_vararg_call(&self, kind: OpKind, argc: usize) -> OpRef {
        Operation::new(
            kind,
            argc as u16, 1, 1,
            1, 1, 2,
            Type::any(),
            OpFlags::CAN_THROW,
        )
    }

    pub fn get_js_tail_call(&self, argc: usize) -> OpRef {
        Operation::new(
            OpKind::JsTailCall,
            argc as u16, 1, 1,
            0, 0, 1,
            Type::none(),
            OpFlags::NONE,
        )
    }

    /// The lowered tail call: cpp frame, engine, function, this object,
    /// argv and argc.
    pub fn get_tail_call(&self) -> OpRef {
        Operation::new(
            OpKind::TailCall,
            6, 1, 1,
            0, 0, 1,
            Type::none(),
            OpFlags::NONE,
        )
    }

    pub fn get_va_seal(&self, n_elements: usize) -> OpRef {
        Operation::new(
            OpKind::VaSeal,
            n_elements as u16 + 1, 1, 0,
            1, 1, 0,
            Type::any(),
            OpFlags::NONE,
        )
    }

    /// Build the operation of a lowered runtime call to `callee`.
    pub fn get_call(&self, callee: OpKind) -> OpRef {
        let can_throw = runtime::can_throw(callee);
        let ret_ty = runtime::return_type(callee);
        let mut n_control_inputs: u16 = 0;
        let mut n_control_outputs: u16 = 0;
        if can_throw {
            n_control_inputs = 1;
            n_control_outputs += 2;
        }
        if runtime::changes_context(callee) {
            n_control_inputs = 1;
            n_control_outputs = n_control_outputs.max(1);
        }
        if matches!(
            callee,
            OpKind::Throw
                | OpKind::ThrowReferenceError
                | OpKind::JsIteratorNext
                | OpKind::JsIteratorNextForYieldStar
        ) {
            n_control_inputs = 1;
            n_control_outputs = 1;
        }
        let mut flags = OpFlags::NONE;
        if can_throw {
            flags = flags | OpFlags::CAN_THROW;
        }
        if runtime::is_pure(callee) {
            flags = flags | OpFlags::PURE;
        }
        let n_effects: u16 = if flags.contains(OpFlags::PURE) { 0 } else { 1 };
        let n_value_outputs: u16 = if ret_ty.is_none() { 0 } else { 1 };
        let n_value_inputs = runtime::argc(callee) as u16;

        Operation::with_payload(
            OpKind::Call,
            n_value_inputs, n_effects, n_control_inputs,
            n_value_outputs, n_effects, n_control_outputs,
            ret_ty,
            flags,
            Payload::Call { callee },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_operations_are_interned() {
        let b = OperationBuilder::new();
        let a1 = b.get(OpKind::JsAdd);
        let a2 = b.get(OpKind::JsAdd);
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(a1.kind(), OpKind::JsAdd);
        assert_eq!(a1.value_input_count(), 2);
        assert_eq!(a1.effect_input_count(), 1);
        assert_eq!(a1.control_input_count(), 1);
        assert!(a1.can_throw());
        assert!(a1.needs_bytecode_offsets());
    }

    #[test]
    fn test_input_slot_layout() {
        let b = OperationBuilder::new();
        let op = b.get(OpKind::JsStoreElement);
        assert_eq!(op.index_of_first_effect(), 3);
        assert_eq!(op.index_of_first_control(), 4);
        assert_eq!(op.total_input_count(), 5);
        assert_eq!(op.index_of_frame_state_input(), None);

        let branch = b.get(OpKind::Branch);
        assert!(branch.has_frame_state_input());
        assert_eq!(branch.index_of_frame_state_input(), Some(2));
        assert_eq!(branch.total_input_count(), 3);
    }

    #[test]
    fn test_constant_payloads() {
        let b = OperationBuilder::new();
        let c = b.get_constant(Value::Int32(7));
        assert!(c.is_constant());
        assert!(c.typ().is_int32());
        assert_eq!(c.constant_payload(), Some(&Value::Int32(7)));

        let undef = b.get(OpKind::Undefined);
        assert!(undef.is_constant());
        assert_eq!(undef.constant_payload(), None);

        // the interned empty constant is an ordinary Constant operation
        let empty = b.get(OpKind::Empty);
        assert_eq!(empty.kind(), OpKind::Constant);
        assert_eq!(empty.constant_payload(), Some(&Value::Empty));
    }

    #[test]
    fn test_phi_and_region_arities() {
        let b = OperationBuilder::new();
        let region = b.get_region(3);
        assert_eq!(region.control_input_count(), 3);
        assert_eq!(region.control_output_count(), 1);
        let phi = b.get_phi(3);
        assert_eq!(phi.value_input_count(), 3);
        assert_eq!(phi.control_input_count(), 1);
        assert_eq!(phi.total_input_count(), 4);
        let ephi = b.get_effect_phi(2);
        assert_eq!(ephi.effect_input_count(), 2);
        assert_eq!(ephi.total_input_count(), 3);
    }

    #[test]
    fn test_call_operation_shape() {
        let b = OperationBuilder::new();
        // JsAdd lowers to Add(engine, lhs, rhs), throwing.
        let call = b.get_call(OpKind::JsAdd);
        assert_eq!(call.kind(), OpKind::Call);
        assert_eq!(call.call_payload(), Some(OpKind::JsAdd));
        assert_eq!(call.value_input_count(), 3);
        assert_eq!(call.effect_input_count(), 1);
        assert_eq!(call.control_input_count(), 1);
        assert_eq!(call.control_output_count(), 2);
        assert!(call.can_throw());

        // a pure callee gets no effect or control edges
        let tmpl = b.get_call(OpKind::JsGetTemplateObject);
        assert_eq!(tmpl.effect_input_count(), 0);
        assert_eq!(tmpl.control_input_count(), 0);
        assert_eq!(tmpl.control_output_count(), 0);
        assert!(tmpl.is_pure());

        // throw is pre-wired to the handler: one control in, one out
        let throw = b.get_call(OpKind::Throw);
        assert_eq!(throw.control_input_count(), 1);
        assert_eq!(throw.control_output_count(), 1);
        assert!(!throw.can_throw());
        assert_eq!(throw.value_output_count(), 0);
    }
}
