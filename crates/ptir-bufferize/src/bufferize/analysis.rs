use std::collections::{BTreeMap, HashSet};

use super::liveness::Liveness;
use super::rules::{alias_rule, is_read_only_source, AliasRule};
use super::store::{EquivalenceStore, TensorKey};
use super::walker::{walk_function, FunctionVisitor, WalkError};
use super::{AnalysisError, AnalysisOptions, DestinationPolicy};
use crate::ir_query::{leaf_keys, OperandTypeError, ValueTypes};
use crate::spec::{
    CondSpec, Function, Instruction, Operand, Operation, Program, Region, RegionId, ScanSpec,
    ValueId, ValueType, WhileSpec,
};

/// Computes the buffer equivalence classes of `function`.
///
/// Every tensor leaf of the function, its nested regions and their parameters is
/// registered in the returned store. Classes reaching `function.result_ids` are
/// marked as output-aliased. Any structural problem aborts the whole analysis.
#[tracing::instrument(skip_all, fields(function = %function.name))]
pub fn analyze_function(
    program: &Program,
    function: &Function,
    options: &AnalysisOptions,
) -> Result<EquivalenceStore, AnalysisError> {
    let liveness = Liveness::compute(program, function)?;
    let mut analyzer = AliasAnalyzer::new(program, options, liveness);
    walk_function(program, function, &mut analyzer)?;
    let store = analyzer.store;
    tracing::debug!(
        keys = store.len(),
        classes = store.class_count(),
        "alias analysis finished"
    );
    Ok(store)
}

/// Analyzes the function called `name`.
pub fn analyze_named(
    program: &Program,
    name: &str,
    options: &AnalysisOptions,
) -> Result<EquivalenceStore, AnalysisError> {
    let function = program
        .function(name)
        .ok_or_else(|| AnalysisError::FunctionNotFound(name.to_string()))?;
    analyze_function(program, function, options)
}

/// Analyzes every function independently, keyed by function name.
pub fn analyze_program(
    program: &Program,
    options: &AnalysisOptions,
) -> Result<BTreeMap<String, EquivalenceStore>, AnalysisError> {
    program
        .functions
        .iter()
        .map(|function| {
            let store = analyze_function(program, function, options)?;
            Ok((function.name.clone(), store))
        })
        .collect()
}

struct AliasAnalyzer<'a> {
    program: &'a Program,
    options: &'a AnalysisOptions,
    liveness: Liveness,
    types: ValueTypes,
    store: EquivalenceStore,
    /// Values whose storage is never written (function inputs, constants).
    read_only: HashSet<ValueId>,
    /// Region parameters that must not be overwritten while their region runs.
    protected: HashSet<ValueId>,
    scopes: Vec<HashSet<ValueId>>,
}

impl<'a> AliasAnalyzer<'a> {
    fn new(program: &'a Program, options: &'a AnalysisOptions, liveness: Liveness) -> Self {
        Self {
            program,
            options,
            liveness,
            types: ValueTypes::new(),
            store: EquivalenceStore::new(),
            read_only: HashSet::new(),
            protected: HashSet::new(),
            scopes: Vec::new(),
        }
    }

    fn define(&mut self, id: ValueId, ty: &ValueType) -> Result<(), AnalysisError> {
        if !self.types.define(id, ty.clone()) {
            return Err(AnalysisError::DuplicateDefinition { value: id });
        }
        for key in leaf_keys(id, &[], ty) {
            self.store.insert(&key);
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(id);
        }
        Ok(())
    }

    fn in_scope(&self, id: ValueId) -> bool {
        self.scopes.iter().any(|scope| scope.contains(&id))
    }

    fn in_current_scope(&self, id: ValueId) -> bool {
        self.scopes.last().is_some_and(|scope| scope.contains(&id))
    }

    fn region(&self, id: RegionId, owner: ValueId) -> Result<&'a Region, AnalysisError> {
        self.program.region(id).ok_or(AnalysisError::Walk(WalkError::MissingRegion {
            region: id,
            instruction: owner,
        }))
    }

    fn check_operand(&self, inst: &Instruction, operand: &Operand) -> Result<(), AnalysisError> {
        if let Some(id) = operand.value_id() {
            if !self.in_scope(id) {
                return Err(AnalysisError::InvalidOperand {
                    instruction: inst.id,
                    source: OperandTypeError::ValueNotFound(id.0),
                });
            }
        }
        self.types
            .operand_type(operand)
            .map(|_| ())
            .map_err(|source| AnalysisError::InvalidOperand {
                instruction: inst.id,
                source,
            })
    }

    fn operand_at<'i>(
        &self,
        inst: &'i Instruction,
        index: usize,
    ) -> Result<&'i Operand, AnalysisError> {
        inst.operands
            .get(index)
            .ok_or(AnalysisError::MissingOperand {
                instruction: inst.id,
                index,
            })
    }

    fn operand_type(&self, inst: &Instruction, index: usize) -> Result<ValueType, AnalysisError> {
        let operand = self.operand_at(inst, index)?;
        self.types
            .operand_type(operand)
            .map_err(|source| AnalysisError::InvalidOperand {
                instruction: inst.id,
                source,
            })
    }

    fn operand_keys(&self, inst: &Instruction, operand: &Operand) -> Vec<TensorKey> {
        // Operands were validated on entry to the instruction.
        self.types.operand_keys(operand).unwrap_or_else(|err| {
            tracing::warn!(instruction = inst.id.0, %err, "operand keys unavailable");
            Vec::new()
        })
    }

    fn union_leaves(&mut self, a: &[TensorKey], b: &[TensorKey], reason: &'static str) {
        for (a, b) in a.iter().zip(b) {
            if self.store.union(a, b) {
                tracing::trace!(%a, %b, reason, "union");
            }
        }
    }

    fn has_read_only_member(&self, members: &[TensorKey]) -> bool {
        members
            .iter()
            .any(|member| self.read_only.contains(&member.value))
    }

    fn has_protected_member(&self, members: &[TensorKey]) -> bool {
        members
            .iter()
            .any(|member| self.protected.contains(&member.value) && self.in_scope(member.value))
    }

    fn apply_view(&mut self, inst: &Instruction, source: usize) -> Result<(), AnalysisError> {
        let operand = self.operand_at(inst, source)?;
        if matches!(operand, Operand::Literal(_)) {
            self.read_only.insert(inst.id);
            return Ok(());
        }
        let source_keys = self.operand_keys(inst, operand);
        let result_keys = leaf_keys(inst.id, &[], &inst.output);
        if source_keys.len() != result_keys.len() {
            return Err(AnalysisError::OperandTypeMismatch {
                instruction: inst.id,
                operand: source,
            });
        }
        self.union_leaves(&result_keys, &source_keys, "view");
        Ok(())
    }

    /// Ties the result of `inst` to operand `index` when that buffer is free.
    fn try_destination(&mut self, inst: &Instruction, index: usize) -> bool {
        let Some(operand) = inst.operands.get(index) else {
            return false;
        };
        let Some(value) = operand.value_id() else {
            tracing::trace!(instruction = inst.id.0, index, "destination is a literal");
            return false;
        };
        if !matches!(inst.output, ValueType::Tensor(_)) {
            return false;
        }
        if self.types.operand_type(operand).ok().as_ref() != Some(&inst.output) {
            tracing::trace!(instruction = inst.id.0, index, "destination type differs");
            return false;
        }
        if !self.in_current_scope(value) {
            tracing::trace!(instruction = inst.id.0, index, "destination is a capture");
            return false;
        }
        let Some(dest) = self.operand_keys(inst, operand).into_iter().next() else {
            return false;
        };
        let Some(pos) = self.liveness.op_position(inst.id) else {
            return false;
        };

        let members = self.store.members_of(&dest);
        if self.has_read_only_member(&members) || self.has_protected_member(&members) {
            tracing::trace!(instruction = inst.id.0, %dest, "destination is read-only");
            return false;
        }
        if let Some(live) = members
            .iter()
            .find(|member| !self.liveness.dead_after(member.value, pos.exit))
        {
            tracing::trace!(
                instruction = inst.id.0,
                %dest,
                %live,
                last_use = ?self.liveness.last_use(live.value),
                "destination still live"
            );
            return false;
        }
        let aliased_read = inst
            .operands
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != index)
            .flat_map(|(_, other)| self.operand_keys(inst, other))
            .any(|key| key != dest && self.store.is_equivalent(&key, &dest));
        if aliased_read {
            tracing::trace!(instruction = inst.id.0, %dest, "destination read through an alias");
            return false;
        }

        let result = TensorKey::value(inst.id);
        self.store.union(&result, &dest);
        tracing::debug!(%result, %dest, "in-place");
        true
    }

    fn apply_inplace_candidate(&mut self, inst: &Instruction) {
        let Some(last) = inst.operands.len().checked_sub(1) else {
            return;
        };
        match self.options.destination_policy {
            DestinationPolicy::LastOperand => {
                self.try_destination(inst, last);
            }
            DestinationPolicy::LastMatchingOperand => {
                for index in (0..=last).rev() {
                    if self.try_destination(inst, index) {
                        break;
                    }
                }
            }
        }
    }

    /// Merges two existing classes when they never hold live data at the same time.
    fn try_join(&mut self, a: &TensorKey, b: &TensorKey, reason: &'static str) -> bool {
        if self.store.is_equivalent(a, b) {
            return true;
        }
        let left = self.store.members_of(a);
        let right = self.store.members_of(b);
        if self.has_read_only_member(&left) || self.has_read_only_member(&right) {
            tracing::trace!(%a, %b, reason, "join skipped: read-only member");
            return false;
        }
        for x in &left {
            if let Some(y) = right
                .iter()
                .find(|y| self.liveness.interferes(x.value, y.value))
            {
                tracing::trace!(%a, %b, %x, %y, reason, "join skipped: live ranges overlap");
                return false;
            }
        }
        self.store.union(a, b);
        tracing::debug!(%a, %b, reason, "join");
        true
    }

    fn join_leaves(&mut self, results: &[TensorKey], others: &[TensorKey], reason: &'static str) {
        for (result, other) in results.iter().zip(others) {
            self.try_join(result, other, reason);
        }
    }

    /// Splits a structured op's output into `expected` results.
    fn structured_results(
        &self,
        inst: &Instruction,
        expected: usize,
    ) -> Result<Vec<(Vec<usize>, ValueType)>, AnalysisError> {
        match &inst.output {
            ValueType::Tuple(elements) if expected != 1 && elements.len() == expected => Ok(
                elements
                    .iter()
                    .enumerate()
                    .map(|(index, ty)| (vec![index], ty.clone()))
                    .collect(),
            ),
            ty if expected == 1 => Ok(vec![(Vec::new(), ty.clone())]),
            _ => Err(AnalysisError::ResultArity {
                instruction: inst.id,
                expected,
            }),
        }
    }

    fn expect_arity(
        region: &Region,
        what: &'static str,
        expected: usize,
        found: usize,
    ) -> Result<(), AnalysisError> {
        if expected != found {
            return Err(AnalysisError::RegionArity {
                region: region.id,
                what,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn yield_type(&self, region: &Region, index: usize) -> Result<ValueType, AnalysisError> {
        let id = region.result_ids[index];
        self.types
            .get(id)
            .cloned()
            .ok_or(AnalysisError::UndefinedValue { value: id })
    }

    /// Checks parameter `index` of `region` against `ty`.
    fn expect_param_type(
        region: &Region,
        index: usize,
        ty: &ValueType,
    ) -> Result<(), AnalysisError> {
        if region.parameters.get(index) != Some(ty) {
            return Err(AnalysisError::RegionTypeMismatch {
                region: region.id,
                index,
            });
        }
        Ok(())
    }

    fn enter_cond_branch(
        &mut self,
        owner: &Instruction,
        region: &Region,
    ) -> Result<(), AnalysisError> {
        if owner.operands.is_empty() {
            return Err(AnalysisError::MissingOperand {
                instruction: owner.id,
                index: 0,
            });
        }
        let args = &owner.operands[1..];
        Self::expect_arity(region, "parameters", args.len(), region.parameter_ids.len())?;
        for (index, arg) in args.iter().enumerate() {
            let ty = self.operand_type(owner, index + 1)?;
            Self::expect_param_type(region, index, &ty)?;
            let param = region.parameter_ids[index];
            if matches!(arg, Operand::Literal(_)) {
                self.read_only.insert(param);
                continue;
            }
            let arg_keys = self.operand_keys(owner, arg);
            let param_keys = leaf_keys(param, &[], &ty);
            self.union_leaves(&param_keys, &arg_keys, "branch argument");
        }
        Ok(())
    }

    fn enter_loop_region(
        &mut self,
        owner: &Instruction,
        region: &Region,
        carries: usize,
        protect_carries: bool,
    ) -> Result<(), AnalysisError> {
        Self::expect_arity(
            region,
            "parameters",
            owner.operands.len(),
            region.parameter_ids.len(),
        )?;
        for index in 0..carries {
            let ty = self.operand_type(owner, index)?;
            Self::expect_param_type(region, index, &ty)?;
        }
        for (index, param) in region.parameter_ids.iter().enumerate() {
            if protect_carries || index >= carries {
                self.protected.insert(*param);
            }
        }
        Ok(())
    }

    fn apply_cond(&mut self, inst: &Instruction, spec: &CondSpec) -> Result<(), AnalysisError> {
        let branches = [
            self.region(spec.true_region, inst.id)?,
            self.region(spec.false_region, inst.id)?,
        ];
        let expected = branches[0].result_ids.len();
        Self::expect_arity(
            branches[1],
            "results",
            expected,
            branches[1].result_ids.len(),
        )?;
        let results = self.structured_results(inst, expected)?;
        for branch in branches {
            for (index, (_, ty)) in results.iter().enumerate() {
                if &self.yield_type(branch, index)? != ty {
                    return Err(AnalysisError::RegionTypeMismatch {
                        region: branch.id,
                        index,
                    });
                }
            }
        }
        if !self.options.allow_inplace {
            return Ok(());
        }
        for branch in branches {
            for (index, (path, ty)) in results.iter().enumerate() {
                let result_keys = leaf_keys(inst.id, path, ty);
                let yield_keys = leaf_keys(branch.result_ids[index], &[], ty);
                self.join_leaves(&result_keys, &yield_keys, "branch yield");
            }
        }
        Ok(())
    }

    /// Shared rule for `While` and `Scan`: the first `carries` results are loop
    /// carried buffers, anything after them is a fresh stacked output.
    fn apply_loop(
        &mut self,
        inst: &Instruction,
        carry_regions: &[&'a Region],
        body: &'a Region,
        carries: usize,
        result_count: usize,
    ) -> Result<(), AnalysisError> {
        if inst.operands.len() < carries {
            return Err(AnalysisError::MissingOperand {
                instruction: inst.id,
                index: inst.operands.len(),
            });
        }
        Self::expect_arity(body, "results", result_count, body.result_ids.len())?;
        let results = self.structured_results(inst, result_count)?;
        for (index, (_, ty)) in results.iter().enumerate().take(carries) {
            if &self.yield_type(body, index)? != ty || &self.operand_type(inst, index)? != ty {
                return Err(AnalysisError::RegionTypeMismatch {
                    region: body.id,
                    index,
                });
            }
        }

        for (index, (path, ty)) in results.iter().enumerate().take(carries) {
            let result_keys = leaf_keys(inst.id, path, ty);
            for region in carry_regions {
                let param_keys = leaf_keys(region.parameter_ids[index], &[], ty);
                self.union_leaves(&result_keys, &param_keys, "loop carry");
            }
        }
        if !self.options.allow_inplace {
            return Ok(());
        }
        for (index, (path, ty)) in results.iter().enumerate().take(carries) {
            let result_keys = leaf_keys(inst.id, path, ty);
            let yield_keys = leaf_keys(body.result_ids[index], &[], ty);
            self.join_leaves(&result_keys, &yield_keys, "loop yield");

            let init = &inst.operands[index];
            match init.value_id() {
                Some(value) if self.in_current_scope(value) => {
                    let init_keys = self.operand_keys(inst, init);
                    self.join_leaves(&result_keys, &init_keys, "loop init");
                }
                Some(_) => tracing::trace!(instruction = inst.id.0, index, "init is a capture"),
                None => {}
            }
        }
        Ok(())
    }

    fn apply_while(&mut self, inst: &Instruction, spec: &WhileSpec) -> Result<(), AnalysisError> {
        let cond = self.region(spec.cond_region, inst.id)?;
        let body = self.region(spec.body_region, inst.id)?;
        Self::expect_arity(cond, "results", 1, cond.result_ids.len())?;
        let carries = inst.operands.len();
        self.apply_loop(inst, &[body, cond], body, carries, carries)
    }

    fn apply_scan(&mut self, inst: &Instruction, spec: &ScanSpec) -> Result<(), AnalysisError> {
        let body = self.region(spec.body_region, inst.id)?;
        self.apply_loop(
            inst,
            &[body],
            body,
            spec.carry_count,
            spec.carry_count + spec.scan_output_count,
        )
    }
}

impl FunctionVisitor for AliasAnalyzer<'_> {
    type Error = AnalysisError;

    fn on_function_enter(&mut self, function: &Function) -> Result<(), AnalysisError> {
        signature_arity(
            function,
            "parameter types",
            function.parameter_ids.len(),
            function.parameters.len(),
        )?;
        signature_arity(
            function,
            "result types",
            function.result_ids.len(),
            function.results.len(),
        )?;
        self.scopes.push(HashSet::new());
        for (id, ty) in function.parameter_ids.iter().zip(&function.parameters) {
            self.define(*id, ty)?;
            self.read_only.insert(*id);
        }
        Ok(())
    }

    fn on_op_enter(&mut self, inst: &Instruction) -> Result<(), AnalysisError> {
        for operand in &inst.operands {
            self.check_operand(inst, operand)?;
        }
        Ok(())
    }

    fn on_region_enter(
        &mut self,
        owner: &Instruction,
        index: usize,
        region: &Region,
    ) -> Result<(), AnalysisError> {
        Self::expect_arity(
            region,
            "parameter types",
            region.parameter_ids.len(),
            region.parameters.len(),
        )?;
        self.scopes.push(HashSet::new());
        for (id, ty) in region.parameter_ids.iter().zip(&region.parameters) {
            self.define(*id, ty)?;
        }
        match &owner.op {
            Operation::Cond(_) => self.enter_cond_branch(owner, region),
            Operation::While(_) => {
                let carries = owner.operands.len();
                self.enter_loop_region(owner, region, carries, index == 0)
            }
            Operation::Scan(spec) => {
                self.enter_loop_region(owner, region, spec.carry_count, false)
            }
            _ => Ok(()),
        }
    }

    fn on_region_exit(
        &mut self,
        _owner: &Instruction,
        _index: usize,
        region: &Region,
    ) -> Result<(), AnalysisError> {
        Self::expect_arity(
            region,
            "result types",
            region.result_ids.len(),
            region.results.len(),
        )?;
        for (index, id) in region.result_ids.iter().enumerate() {
            if !self.in_scope(*id) {
                return Err(AnalysisError::UndefinedValue { value: *id });
            }
            if self.types.get(*id) != region.results.get(index) {
                return Err(AnalysisError::RegionTypeMismatch {
                    region: region.id,
                    index,
                });
            }
        }
        self.scopes.pop();
        Ok(())
    }

    fn on_instruction(&mut self, inst: &Instruction) -> Result<(), AnalysisError> {
        self.define(inst.id, &inst.output)?;
        let rule = alias_rule(&inst.op).map_err(|err| AnalysisError::InvalidAliasAttr {
            instruction: inst.id,
            attr: err.attr,
            value: err.value,
        })?;
        match rule {
            AliasRule::View { source } => self.apply_view(inst, source)?,
            AliasRule::Destination { operand } => {
                self.operand_at(inst, operand)?;
                if self.options.allow_inplace {
                    self.try_destination(inst, operand);
                }
            }
            AliasRule::InPlaceCandidate => {
                if self.options.allow_inplace {
                    self.apply_inplace_candidate(inst);
                }
            }
            AliasRule::Fresh => {
                if is_read_only_source(&inst.op) {
                    self.read_only.insert(inst.id);
                }
            }
            AliasRule::Structured => match &inst.op {
                Operation::Cond(spec) => self.apply_cond(inst, spec)?,
                Operation::While(spec) => self.apply_while(inst, spec)?,
                Operation::Scan(spec) => self.apply_scan(inst, spec)?,
                _ => {}
            },
            AliasRule::Unstructured => {
                if !inst.output.tensor_paths().is_empty() {
                    return Err(AnalysisError::UnstructuredMerge { value: inst.id });
                }
            }
        }
        Ok(())
    }

    fn on_function_exit(&mut self, function: &Function) -> Result<(), AnalysisError> {
        for (index, id) in function.result_ids.iter().enumerate() {
            if !self.in_scope(*id) {
                return Err(AnalysisError::UndefinedValue { value: *id });
            }
            let ty = self
                .types
                .get(*id)
                .cloned()
                .ok_or(AnalysisError::UndefinedValue { value: *id })?;
            if function.results.get(index) != Some(&ty) {
                return Err(AnalysisError::FunctionTypeMismatch {
                    function: function.name.clone(),
                    index,
                });
            }
            for key in leaf_keys(*id, &[], &ty) {
                self.store.mark_as_output(&key);
                tracing::debug!(%key, "output");
            }
        }
        self.scopes.pop();
        Ok(())
    }
}

fn signature_arity(
    function: &Function,
    what: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), AnalysisError> {
    if expected != found {
        return Err(AnalysisError::FunctionArity {
            function: function.name.clone(),
            what,
            expected,
            found,
        });
    }
    Ok(())
}
