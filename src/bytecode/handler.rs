//! The bytecode walker and the per-opcode handler interface.
//!
//! [`dispatch`] decodes a function's instruction stream and drives a
//! [`ByteCodeHandler`]: `start_instruction` first (which may skip the
//! instruction), then the opcode's `generate_*` hook, then
//! `end_instruction`. Jump operands are passed through as decoded, still
//! relative to the next instruction offset.

use super::chunk::CompiledFunction;
use super::opcodes::Opcode;

/// Decision returned by [`ByteCodeHandler::start_instruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    ProcessInstruction,
    SkipInstruction,
}

macro_rules! handler_hooks {
    ($($hook:ident ( $($arg:ident),* );)*) => {
        /// Per-opcode callbacks invoked by [`dispatch`].
        ///
        /// Every hook has a default body that aborts; a handler implements
        /// the opcodes it supports. `start_instruction` receives the
        /// bytecode offsets of the current and the next instruction.
        pub trait ByteCodeHandler {
            fn start_instruction(&mut self, op: Opcode, offset: i32, next_offset: i32) -> Verdict;
            fn end_instruction(&mut self, op: Opcode);

            $(
                fn $hook(&mut self $(, $arg: i32)*) {
                    $(let _ = $arg;)*
                    panic!(concat!("bytecode handler does not implement ", stringify!($hook)));
                }
            )*
        }
    };
}

handler_hooks! {
    generate_ret();
    generate_debug();
    generate_load_const(index);
    generate_load_zero();
    generate_load_true();
    generate_load_false();
    generate_load_null();
    generate_load_undefined();
    generate_load_int(value);
    generate_move_const(const_index, dest_temp);
    generate_load_reg(reg);
    generate_store_reg(reg);
    generate_move_reg(src_reg, dest_reg);
    generate_load_import(index);
    generate_load_runtime_string(string_id);
    generate_move_reg_exp(reg_exp_id, dest_reg);
    generate_load_closure(value);
    generate_load_local(index, trace_slot);
    generate_store_local(index);
    generate_load_scoped_local(scope, index, trace_slot);
    generate_store_scoped_local(scope, index);
    generate_load_name(name, trace_slot);
    generate_load_global_lookup(index, trace_slot);
    generate_store_name_sloppy(name);
    generate_store_name_strict(name);
    generate_load_element(base, trace_slot);
    generate_store_element(base, index, trace_slot);
    generate_load_property(name, trace_slot);
    generate_get_lookup(index, trace_slot);
    generate_store_property(name, base);
    generate_set_lookup(index, base);
    generate_load_super_property(property);
    generate_store_super_property(property);
    generate_store_scope_object_property(base, property_index);
    generate_store_context_object_property(base, property_index);
    generate_load_scope_object_property(property_index, base, capture_required);
    generate_load_context_object_property(property_index, base, capture_required);
    generate_load_id_object(index, base);
    generate_yield();
    generate_yield_star();
    generate_resume(offset);
    generate_call_value(name, argc, argv, trace_slot);
    generate_call_with_receiver(name, this_object, argc, argv, trace_slot);
    generate_call_property(name, base, argc, argv, trace_slot);
    generate_call_property_lookup(lookup_index, base, argc, argv, trace_slot);
    generate_call_element(base, index, argc, argv, trace_slot);
    generate_call_name(name, argc, argv, trace_slot);
    generate_call_possibly_direct_eval(argc, argv, trace_slot);
    generate_call_global_lookup(index, argc, argv, trace_slot);
    generate_call_scope_object_property(prop_idx, base, argc, argv, trace_slot);
    generate_call_context_object_property(prop_idx, base, argc, argv, trace_slot);
    generate_call_with_spread(func, this_object, argc, argv, trace_slot);
    generate_tail_call(func, this_object, argc, argv);
    generate_construct(func, argc, argv);
    generate_construct_with_spread(func, argc, argv);
    generate_set_unwind_handler(offset);
    generate_unwind_dispatch();
    generate_unwind_to_label(level, offset);
    generate_dead_temporal_zone_check(name);
    generate_throw_exception();
    generate_get_exception();
    generate_set_exception();
    generate_create_call_context();
    generate_push_catch_context(index, name);
    generate_push_with_context();
    generate_push_block_context(index);
    generate_clone_block_context();
    generate_push_script_context(index);
    generate_pop_script_context();
    generate_pop_context();
    generate_get_iterator(iterator);
    generate_iterator_next(value, done);
    generate_iterator_next_for_yield_star(iterator, object);
    generate_iterator_close(done);
    generate_destructure_rest_element();
    generate_delete_property(base, index);
    generate_delete_name(name);
    generate_typeof_name(name);
    generate_typeof_value();
    generate_declare_var(var_name, is_deletable);
    generate_define_array(argc, argv);
    generate_define_object_literal(internal_class_id, argc, argv);
    generate_create_class(class_index, heritage, computed_names);
    generate_create_mapped_arguments_object();
    generate_create_unmapped_arguments_object();
    generate_create_rest_parameter(arg_index);
    generate_convert_this_to_object();
    generate_load_super_constructor();
    generate_to_object();
    generate_throw_on_null_or_undefined();
    generate_get_template_object(index);
    generate_jump(offset);
    generate_jump_true(trace_slot, offset);
    generate_jump_false(trace_slot, offset);
    generate_jump_no_exception(offset);
    generate_jump_not_undefined(offset);
    generate_cmp_eq_null();
    generate_cmp_ne_null();
    generate_cmp_eq_int(lhs);
    generate_cmp_ne_int(lhs);
    generate_cmp_eq(lhs);
    generate_cmp_ne(lhs);
    generate_cmp_gt(lhs);
    generate_cmp_ge(lhs);
    generate_cmp_lt(lhs);
    generate_cmp_le(lhs);
    generate_cmp_strict_equal(lhs);
    generate_cmp_strict_not_equal(lhs);
    generate_cmp_in(lhs);
    generate_cmp_instance_of(lhs);
    generate_unot();
    generate_uplus(trace_slot);
    generate_uminus(trace_slot);
    generate_ucompl();
    generate_increment(trace_slot);
    generate_decrement(trace_slot);
    generate_add(lhs, trace_slot);
    generate_bit_and(lhs);
    generate_bit_or(lhs);
    generate_bit_xor(lhs);
    generate_ushr(lhs);
    generate_shr(lhs);
    generate_shl(lhs);
    generate_bit_and_const(rhs);
    generate_bit_or_const(rhs);
    generate_bit_xor_const(rhs);
    generate_ushr_const(rhs);
    generate_shr_const(rhs);
    generate_shl_const(rhs);
    generate_exp(lhs);
    generate_mul(lhs, trace_slot);
    generate_div(lhs);
    generate_mod(lhs, trace_slot);
    generate_sub(lhs, trace_slot);
    generate_load_qml_context(result);
    generate_load_qml_imported_scripts(result);
    generate_initialize_block_dead_temporal_zone(first_reg, count);
}

/// Walk a function's bytecode, invoking the handler per instruction.
pub fn dispatch<H: ByteCodeHandler>(function: &CompiledFunction, handler: &mut H) {
    let chunk = function.chunk();
    let code = chunk.code();
    let mut offset = 0usize;

    while offset < code.len() {
        let op = Opcode::from_byte(code[offset])
            .unwrap_or_else(|| panic!("invalid opcode byte {:#04x} at offset {}", code[offset], offset));
        let next = offset + op.instruction_size();
        assert!(next <= code.len(), "truncated instruction at offset {}", offset);

        let arg = |i: usize| chunk.read_operand(offset, i).unwrap();

        if handler.start_instruction(op, offset as i32, next as i32) == Verdict::ProcessInstruction {
            match op {
                Opcode::Ret => handler.generate_ret(),
                Opcode::Debug => handler.generate_debug(),
                Opcode::LoadConst => handler.generate_load_const(arg(0)),
                Opcode::LoadZero => handler.generate_load_zero(),
                Opcode::LoadTrue => handler.generate_load_true(),
                Opcode::LoadFalse => handler.generate_load_false(),
                Opcode::LoadNull => handler.generate_load_null(),
                Opcode::LoadUndefined => handler.generate_load_undefined(),
                Opcode::LoadInt => handler.generate_load_int(arg(0)),
                Opcode::MoveConst => handler.generate_move_const(arg(0), arg(1)),
                Opcode::LoadReg => handler.generate_load_reg(arg(0)),
                Opcode::StoreReg => handler.generate_store_reg(arg(0)),
                Opcode::MoveReg => handler.generate_move_reg(arg(0), arg(1)),
                Opcode::LoadImport => handler.generate_load_import(arg(0)),
                Opcode::LoadRuntimeString => handler.generate_load_runtime_string(arg(0)),
                Opcode::MoveRegExp => handler.generate_move_reg_exp(arg(0), arg(1)),
                Opcode::LoadClosure => handler.generate_load_closure(arg(0)),
                Opcode::LoadLocal => handler.generate_load_local(arg(0), arg(1)),
                Opcode::StoreLocal => handler.generate_store_local(arg(0)),
                Opcode::LoadScopedLocal => handler.generate_load_scoped_local(arg(0), arg(1), arg(2)),
                Opcode::StoreScopedLocal => handler.generate_store_scoped_local(arg(0), arg(1)),
                Opcode::LoadName => handler.generate_load_name(arg(0), arg(1)),
                Opcode::LoadGlobalLookup => handler.generate_load_global_lookup(arg(0), arg(1)),
                Opcode::StoreNameSloppy => handler.generate_store_name_sloppy(arg(0)),
                Opcode::StoreNameStrict => handler.generate_store_name_strict(arg(0)),
                Opcode::LoadElement => handler.generate_load_element(arg(0), arg(1)),
                Opcode::StoreElement => handler.generate_store_element(arg(0), arg(1), arg(2)),
                Opcode::LoadProperty => handler.generate_load_property(arg(0), arg(1)),
                Opcode::GetLookup => handler.generate_get_lookup(arg(0), arg(1)),
                Opcode::StoreProperty => handler.generate_store_property(arg(0), arg(1)),
                Opcode::SetLookup => handler.generate_set_lookup(arg(0), arg(1)),
                Opcode::LoadSuperProperty => handler.generate_load_super_property(arg(0)),
                Opcode::StoreSuperProperty => handler.generate_store_super_property(arg(0)),
                Opcode::StoreScopeObjectProperty => {
                    handler.generate_store_scope_object_property(arg(0), arg(1))
                }
                Opcode::StoreContextObjectProperty => {
                    handler.generate_store_context_object_property(arg(0), arg(1))
                }
                Opcode::LoadScopeObjectProperty => {
                    handler.generate_load_scope_object_property(arg(0), arg(1), arg(2))
                }
                Opcode::LoadContextObjectProperty => {
                    handler.generate_load_context_object_property(arg(0), arg(1), arg(2))
                }
                Opcode::LoadIdObject => handler.generate_load_id_object(arg(0), arg(1)),
                Opcode::Yield => handler.generate_yield(),
                Opcode::YieldStar => handler.generate_yield_star(),
                Opcode::Resume => handler.generate_resume(arg(0)),
                Opcode::CallValue => handler.generate_call_value(arg(0), arg(1), arg(2), arg(3)),
                Opcode::CallWithReceiver => {
                    handler.generate_call_with_receiver(arg(0), arg(1), arg(2), arg(3), arg(4))
                }
                Opcode::CallProperty => {
                    handler.generate_call_property(arg(0), arg(1), arg(2), arg(3), arg(4))
                }
                Opcode::CallPropertyLookup => {
                    handler.generate_call_property_lookup(arg(0), arg(1), arg(2), arg(3), arg(4))
                }
                Opcode::CallElement => {
                    handler.generate_call_element(arg(0), arg(1), arg(2), arg(3), arg(4))
                }
                Opcode::CallName => handler.generate_call_name(arg(0), arg(1), arg(2), arg(3)),
                Opcode::CallPossiblyDirectEval => {
                    handler.generate_call_possibly_direct_eval(arg(0), arg(1), arg(2))
                }
                Opcode::CallGlobalLookup => {
                    handler.generate_call_global_lookup(arg(0), arg(1), arg(2), arg(3))
                }
                Opcode::CallScopeObjectProperty => {
                    handler.generate_call_scope_object_property(arg(0), arg(1), arg(2), arg(3), arg(4))
                }
                Opcode::CallContextObjectProperty => handler
                    .generate_call_context_object_property(arg(0), arg(1), arg(2), arg(3), arg(4)),
                Opcode::CallWithSpread => {
                    handler.generate_call_with_spread(arg(0), arg(1), arg(2), arg(3), arg(4))
                }
                Opcode::TailCall => handler.generate_tail_call(arg(0), arg(1), arg(2), arg(3)),
                Opcode::Construct => handler.generate_construct(arg(0), arg(1), arg(2)),
                Opcode::ConstructWithSpread => {
                    handler.generate_construct_with_spread(arg(0), arg(1), arg(2))
                }
                Opcode::SetUnwindHandler => handler.generate_set_unwind_handler(arg(0)),
                Opcode::UnwindDispatch => handler.generate_unwind_dispatch(),
                Opcode::UnwindToLabel => handler.generate_unwind_to_label(arg(0), arg(1)),
                Opcode::DeadTemporalZoneCheck => handler.generate_dead_temporal_zone_check(arg(0)),
                Opcode::ThrowException => handler.generate_throw_exception(),
                Opcode::GetException => handler.generate_get_exception(),
                Opcode::SetException => handler.generate_set_exception(),
                Opcode::CreateCallContext => handler.generate_create_call_context(),
                Opcode::PushCatchContext => handler.generate_push_catch_context(arg(0), arg(1)),
                Opcode::PushWithContext => handler.generate_push_with_context(),
                Opcode::PushBlockContext => handler.generate_push_block_context(arg(0)),
                Opcode::CloneBlockContext => handler.generate_clone_block_context(),
                Opcode::PushScriptContext => handler.generate_push_script_context(arg(0)),
                Opcode::PopScriptContext => handler.generate_pop_script_context(),
                Opcode::PopContext => handler.generate_pop_context(),
                Opcode::GetIterator => handler.generate_get_iterator(arg(0)),
                Opcode::IteratorNext => handler.generate_iterator_next(arg(0), arg(1)),
                Opcode::IteratorNextForYieldStar => {
                    handler.generate_iterator_next_for_yield_star(arg(0), arg(1))
                }
                Opcode::IteratorClose => handler.generate_iterator_close(arg(0)),
                Opcode::DestructureRestElement => handler.generate_destructure_rest_element(),
                Opcode::DeleteProperty => handler.generate_delete_property(arg(0), arg(1)),
                Opcode::DeleteName => handler.generate_delete_name(arg(0)),
                Opcode::TypeofName => handler.generate_typeof_name(arg(0)),
                Opcode::TypeofValue => handler.generate_typeof_value(),
                Opcode::DeclareVar => handler.generate_declare_var(arg(0), arg(1)),
                Opcode::DefineArray => handler.generate_define_array(arg(0), arg(1)),
                Opcode::DefineObjectLiteral => {
                    handler.generate_define_object_literal(arg(0), arg(1), arg(2))
                }
                Opcode::CreateClass => handler.generate_create_class(arg(0), arg(1), arg(2)),
                Opcode::CreateMappedArgumentsObject => {
                    handler.generate_create_mapped_arguments_object()
                }
                Opcode::CreateUnmappedArgumentsObject => {
                    handler.generate_create_unmapped_arguments_object()
                }
                Opcode::CreateRestParameter => handler.generate_create_rest_parameter(arg(0)),
                Opcode::ConvertThisToObject => handler.generate_convert_this_to_object(),
                Opcode::LoadSuperConstructor => handler.generate_load_super_constructor(),
                Opcode::ToObject => handler.generate_to_object(),
                Opcode::ThrowOnNullOrUndefined => handler.generate_throw_on_null_or_undefined(),
                Opcode::GetTemplateObject => handler.generate_get_template_object(arg(0)),
                Opcode::Jump => handler.generate_jump(arg(0)),
                Opcode::JumpTrue => handler.generate_jump_true(arg(0), arg(1)),
                Opcode::JumpFalse => handler.generate_jump_false(arg(0), arg(1)),
                Opcode::JumpNoException => handler.generate_jump_no_exception(arg(0)),
                Opcode::JumpNotUndefined => handler.generate_jump_not_undefined(arg(0)),
                Opcode::CmpEqNull => handler.generate_cmp_eq_null(),
                Opcode::CmpNeNull => handler.generate_cmp_ne_null(),
                Opcode::CmpEqInt => handler.generate_cmp_eq_int(arg(0)),
                Opcode::CmpNeInt => handler.generate_cmp_ne_int(arg(0)),
                Opcode::CmpEq => handler.generate_cmp_eq(arg(0)),
                Opcode::CmpNe => handler.generate_cmp_ne(arg(0)),
                Opcode::CmpGt => handler.generate_cmp_gt(arg(0)),
                Opcode::CmpGe => handler.generate_cmp_ge(arg(0)),
                Opcode::CmpLt => handler.generate_cmp_lt(arg(0)),
                Opcode::CmpLe => handler.generate_cmp_le(arg(0)),
                Opcode::CmpStrictEqual => handler.generate_cmp_strict_equal(arg(0)),
                Opcode::CmpStrictNotEqual => handler.generate_cmp_strict_not_equal(arg(0)),
                Opcode::CmpIn => handler.generate_cmp_in(arg(0)),
                Opcode::CmpInstanceOf => handler.generate_cmp_instance_of(arg(0)),
                Opcode::UNot => handler.generate_unot(),
                Opcode::UPlus => handler.generate_uplus(arg(0)),
                Opcode::UMinus => handler.generate_uminus(arg(0)),
                Opcode::UCompl => handler.generate_ucompl(),
                Opcode::Increment => handler.generate_increment(arg(0)),
                Opcode::Decrement => handler.generate_decrement(arg(0)),
                Opcode::Add => handler.generate_add(arg(0), arg(1)),
                Opcode::BitAnd => handler.generate_bit_and(arg(0)),
                Opcode::BitOr => handler.generate_bit_or(arg(0)),
                Opcode::BitXor => handler.generate_bit_xor(arg(0)),
                Opcode::UShr => handler.generate_ushr(arg(0)),
                Opcode::Shr => handler.generate_shr(arg(0)),
                Opcode::Shl => handler.generate_shl(arg(0)),
                Opcode::BitAndConst => handler.generate_bit_and_const(arg(0)),
                Opcode::BitOrConst => handler.generate_bit_or_const(arg(0)),
                Opcode::BitXorConst => handler.generate_bit_xor_const(arg(0)),
                Opcode::UShrConst => handler.generate_ushr_const(arg(0)),
                Opcode::ShrConst => handler.generate_shr_const(arg(0)),
                Opcode::ShlConst => handler.generate_shl_const(arg(0)),
                Opcode::Exp => handler.generate_exp(arg(0)),
                Opcode::Mul => handler.generate_mul(arg(0), arg(1)),
                Opcode::Div => handler.generate_div(arg(0)),
                Opcode::Mod => handler.generate_mod(arg(0), arg(1)),
                Opcode::Sub => handler.generate_sub(arg(0), arg(1)),
                Opcode::LoadQmlContext => handler.generate_load_qml_context(arg(0)),
                Opcode::LoadQmlImportedScripts => {
                    handler.generate_load_qml_imported_scripts(arg(0))
                }
                Opcode::InitializeBlockDeadTemporalZone => {
                    handler.generate_initialize_block_dead_temporal_zone(arg(0), arg(1))
                }
            }
            handler.end_instruction(op);
        }

        offset = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::CompiledFunction;

    #[derive(Default)]
    struct RecordingHandler {
        started: Vec<(Opcode, i32, i32)>,
        adds: Vec<(i32, i32)>,
        rets: usize,
        skip_all: bool,
    }

    impl ByteCodeHandler for RecordingHandler {
        fn start_instruction(&mut self, op: Opcode, offset: i32, next: i32) -> Verdict {
            self.started.push((op, offset, next));
            if self.skip_all {
                Verdict::SkipInstruction
            } else {
                Verdict::ProcessInstruction
            }
        }

        fn end_instruction(&mut self, _op: Opcode) {}

        fn generate_load_int(&mut self, _value: i32) {}

        fn generate_add(&mut self, lhs: i32, trace_slot: i32) {
            self.adds.push((lhs, trace_slot));
        }

        fn generate_ret(&mut self) {
            self.rets += 1;
        }
    }

    fn add_function() -> std::sync::Arc<CompiledFunction> {
        let mut fb = CompiledFunction::builder("f");
        fb.code().emit(Opcode::LoadInt, &[3]);
        fb.code().emit(Opcode::Add, &[7, -1]);
        fb.code().emit(Opcode::Ret, &[]);
        fb.build()
    }

    #[test]
    fn test_dispatch_offsets_and_operands() {
        let f = add_function();
        let mut h = RecordingHandler::default();
        dispatch(&f, &mut h);

        assert_eq!(h.started.len(), 3);
        assert_eq!(h.started[0], (Opcode::LoadInt, 0, 5));
        assert_eq!(h.started[1], (Opcode::Add, 5, 14));
        assert_eq!(h.started[2], (Opcode::Ret, 14, 15));
        assert_eq!(h.adds, vec![(7, -1)]);
        assert_eq!(h.rets, 1);
    }

    #[test]
    fn test_skip_instruction() {
        let f = add_function();
        let mut h = RecordingHandler {
            skip_all: true,
            ..Default::default()
        };
        dispatch(&f, &mut h);
        assert_eq!(h.started.len(), 3);
        assert!(h.adds.is_empty());
        assert_eq!(h.rets, 0);
    }
}
