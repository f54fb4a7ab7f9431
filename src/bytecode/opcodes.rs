//! Opcodes of the interpreter bytecode this JIT consumes.
//!
//! The instruction stream is a sequence of one opcode byte followed by a
//! fixed number of 32-bit little-endian operands. Jump operands are relative
//! to the offset of the *next* instruction.

use std::fmt;

macro_rules! opcodes {
    ($($name:ident = $byte:expr, $operands:expr, $mnemonic:expr;)*) => {
        /// Interpreter opcode enumeration.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name = $byte,)*
        }

        impl Opcode {
            /// Decode a single byte into an opcode.
            pub fn from_byte(b: u8) -> Option<Opcode> {
                match b {
                    $($byte => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            /// Encode the opcode as a byte.
            #[inline]
            pub fn to_byte(self) -> u8 {
                self as u8
            }

            /// Number of 32-bit operands following the opcode byte.
            pub fn operand_count(self) -> usize {
                match self {
                    $(Opcode::$name => $operands,)*
                }
            }

            /// Human readable name for disassembly.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    // Function exit and diagnostics
    Ret = 0x00, 0, "ret";
    Debug = 0x01, 0, "debug";

    // Constants and register traffic
    LoadConst = 0x02, 1, "load_const";
    LoadZero = 0x03, 0, "load_zero";
    LoadTrue = 0x04, 0, "load_true";
    LoadFalse = 0x05, 0, "load_false";
    LoadNull = 0x06, 0, "load_null";
    LoadUndefined = 0x07, 0, "load_undefined";
    LoadInt = 0x08, 1, "load_int";
    MoveConst = 0x09, 2, "move_const";
    LoadReg = 0x0A, 1, "load_reg";
    StoreReg = 0x0B, 1, "store_reg";
    MoveReg = 0x0C, 2, "move_reg";
    LoadImport = 0x0D, 1, "load_import";
    LoadRuntimeString = 0x0E, 1, "load_runtime_string";
    MoveRegExp = 0x0F, 2, "move_reg_exp";
    LoadClosure = 0x10, 1, "load_closure";

    // Scope slots
    LoadLocal = 0x11, 2, "load_local";
    StoreLocal = 0x12, 1, "store_local";
    LoadScopedLocal = 0x13, 3, "load_scoped_local";
    StoreScopedLocal = 0x14, 2, "store_scoped_local";

    // Names, properties, elements
    LoadName = 0x15, 2, "load_name";
    LoadGlobalLookup = 0x16, 2, "load_global_lookup";
    StoreNameSloppy = 0x17, 1, "store_name_sloppy";
    StoreNameStrict = 0x18, 1, "store_name_strict";
    LoadElement = 0x19, 2, "load_element";
    StoreElement = 0x1A, 3, "store_element";
    LoadProperty = 0x1B, 2, "load_property";
    GetLookup = 0x1C, 2, "get_lookup";
    StoreProperty = 0x1D, 2, "store_property";
    SetLookup = 0x1E, 2, "set_lookup";
    LoadSuperProperty = 0x1F, 1, "load_super_property";
    StoreSuperProperty = 0x20, 1, "store_super_property";

    // QML object properties
    StoreScopeObjectProperty = 0x21, 2, "store_scope_object_property";
    StoreContextObjectProperty = 0x22, 2, "store_context_object_property";
    LoadScopeObjectProperty = 0x23, 3, "load_scope_object_property";
    LoadContextObjectProperty = 0x24, 3, "load_context_object_property";
    LoadIdObject = 0x25, 2, "load_id_object";

    // Resumable functions (rejected by this compiler)
    Yield = 0x26, 0, "yield";
    YieldStar = 0x27, 0, "yield_star";
    Resume = 0x28, 1, "resume";

    // Calls
    CallValue = 0x29, 4, "call_value";
    CallWithReceiver = 0x2A, 5, "call_with_receiver";
    CallProperty = 0x2B, 5, "call_property";
    CallPropertyLookup = 0x2C, 5, "call_property_lookup";
    CallElement = 0x2D, 5, "call_element";
    CallName = 0x2E, 4, "call_name";
    CallPossiblyDirectEval = 0x2F, 3, "call_possibly_direct_eval";
    CallGlobalLookup = 0x30, 4, "call_global_lookup";
    CallScopeObjectProperty = 0x31, 5, "call_scope_object_property";
    CallContextObjectProperty = 0x32, 5, "call_context_object_property";
    CallWithSpread = 0x33, 5, "call_with_spread";
    TailCall = 0x34, 4, "tail_call";
    Construct = 0x35, 3, "construct";
    ConstructWithSpread = 0x36, 3, "construct_with_spread";

    // Exception handling
    SetUnwindHandler = 0x37, 1, "set_unwind_handler";
    UnwindDispatch = 0x38, 0, "unwind_dispatch";
    UnwindToLabel = 0x39, 2, "unwind_to_label";
    DeadTemporalZoneCheck = 0x3A, 1, "dead_temporal_zone_check";
    ThrowException = 0x3B, 0, "throw_exception";
    GetException = 0x3C, 0, "get_exception";
    SetException = 0x3D, 0, "set_exception";

    // Contexts
    CreateCallContext = 0x3E, 0, "create_call_context";
    PushCatchContext = 0x3F, 2, "push_catch_context";
    PushWithContext = 0x40, 0, "push_with_context";
    PushBlockContext = 0x41, 1, "push_block_context";
    CloneBlockContext = 0x42, 0, "clone_block_context";
    PushScriptContext = 0x43, 1, "push_script_context";
    PopScriptContext = 0x44, 0, "pop_script_context";
    PopContext = 0x45, 0, "pop_context";

    // Iterators
    GetIterator = 0x46, 1, "get_iterator";
    IteratorNext = 0x47, 2, "iterator_next";
    IteratorNextForYieldStar = 0x48, 2, "iterator_next_for_yield_star";
    IteratorClose = 0x49, 1, "iterator_close";
    DestructureRestElement = 0x4A, 0, "destructure_rest_element";

    // Deletion, typeof, declarations
    DeleteProperty = 0x4B, 2, "delete_property";
    DeleteName = 0x4C, 1, "delete_name";
    TypeofName = 0x4D, 1, "typeof_name";
    TypeofValue = 0x4E, 0, "typeof_value";
    DeclareVar = 0x4F, 2, "declare_var";

    // Literals and special objects
    DefineArray = 0x50, 2, "define_array";
    DefineObjectLiteral = 0x51, 3, "define_object_literal";
    CreateClass = 0x52, 3, "create_class";
    CreateMappedArgumentsObject = 0x53, 0, "create_mapped_arguments_object";
    CreateUnmappedArgumentsObject = 0x54, 0, "create_unmapped_arguments_object";
    CreateRestParameter = 0x55, 1, "create_rest_parameter";
    ConvertThisToObject = 0x56, 0, "convert_this_to_object";
    LoadSuperConstructor = 0x57, 0, "load_super_constructor";
    ToObject = 0x58, 0, "to_object";
    ThrowOnNullOrUndefined = 0x59, 0, "throw_on_null_or_undefined";
    GetTemplateObject = 0x5A, 1, "get_template_object";

    // Jumps
    Jump = 0x5B, 1, "jump";
    JumpTrue = 0x5C, 2, "jump_true";
    JumpFalse = 0x5D, 2, "jump_false";
    JumpNoException = 0x5E, 1, "jump_no_exception";
    JumpNotUndefined = 0x5F, 1, "jump_not_undefined";

    // Comparisons
    CmpEqNull = 0x60, 0, "cmp_eq_null";
    CmpNeNull = 0x61, 0, "cmp_ne_null";
    CmpEqInt = 0x62, 1, "cmp_eq_int";
    CmpNeInt = 0x63, 1, "cmp_ne_int";
    CmpEq = 0x64, 1, "cmp_eq";
    CmpNe = 0x65, 1, "cmp_ne";
    CmpGt = 0x66, 1, "cmp_gt";
    CmpGe = 0x67, 1, "cmp_ge";
    CmpLt = 0x68, 1, "cmp_lt";
    CmpLe = 0x69, 1, "cmp_le";
    CmpStrictEqual = 0x6A, 1, "cmp_strict_equal";
    CmpStrictNotEqual = 0x6B, 1, "cmp_strict_not_equal";
    CmpIn = 0x6C, 1, "cmp_in";
    CmpInstanceOf = 0x6D, 1, "cmp_instance_of";

    // Unary operations
    UNot = 0x6E, 0, "unot";
    UPlus = 0x6F, 1, "uplus";
    UMinus = 0x70, 1, "uminus";
    UCompl = 0x71, 0, "ucompl";
    Increment = 0x72, 1, "increment";
    Decrement = 0x73, 1, "decrement";

    // Binary operations
    Add = 0x74, 2, "add";
    BitAnd = 0x75, 1, "bit_and";
    BitOr = 0x76, 1, "bit_or";
    BitXor = 0x77, 1, "bit_xor";
    UShr = 0x78, 1, "ushr";
    Shr = 0x79, 1, "shr";
    Shl = 0x7A, 1, "shl";
    BitAndConst = 0x7B, 1, "bit_and_const";
    BitOrConst = 0x7C, 1, "bit_or_const";
    BitXorConst = 0x7D, 1, "bit_xor_const";
    UShrConst = 0x7E, 1, "ushr_const";
    ShrConst = 0x7F, 1, "shr_const";
    ShlConst = 0x80, 1, "shl_const";
    Exp = 0x81, 1, "exp";
    Mul = 0x82, 2, "mul";
    Div = 0x83, 1, "div";
    Mod = 0x84, 2, "mod";
    Sub = 0x85, 2, "sub";

    // QML environment
    LoadQmlContext = 0x86, 1, "load_qml_context";
    LoadQmlImportedScripts = 0x87, 1, "load_qml_imported_scripts";

    // Temporal dead zone
    InitializeBlockDeadTemporalZone = 0x88, 2, "initialize_block_dead_temporal_zone";
}

impl Opcode {
    /// Size in bytes of a full instruction with this opcode.
    #[inline]
    pub fn instruction_size(self) -> usize {
        1 + 4 * self.operand_count()
    }

    /// Whether this opcode transfers control via a relative jump operand.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpTrue
                | Opcode::JumpFalse
                | Opcode::JumpNoException
                | Opcode::JumpNotUndefined
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_bytes() {
        for b in 0..=0x88u8 {
            let op = Opcode::from_byte(b).expect("contiguous opcode space");
            assert_eq!(op.to_byte(), b);
        }
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_instruction_sizes() {
        assert_eq!(Opcode::Ret.instruction_size(), 1);
        assert_eq!(Opcode::LoadConst.instruction_size(), 5);
        assert_eq!(Opcode::CallProperty.instruction_size(), 21);
    }

    #[test]
    fn test_jump_classification() {
        assert!(Opcode::Jump.is_jump());
        assert!(Opcode::JumpFalse.is_jump());
        assert!(!Opcode::Ret.is_jump());
        assert!(!Opcode::UnwindDispatch.is_jump());
    }
}
