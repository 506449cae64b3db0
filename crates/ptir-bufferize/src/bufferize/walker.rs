use std::collections::HashSet;

use thiserror::Error;

use crate::spec::{Function, Instruction, Program, Region, RegionId, ValueId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalkError {
    #[error("instruction %{} references missing region ^r{}", instruction.0, region.0)]
    MissingRegion {
        region: RegionId,
        instruction: ValueId,
    },
    #[error("region ^r{} is entered more than once (instruction %{})", region.0, instruction.0)]
    RegionReused {
        region: RegionId,
        instruction: ValueId,
    },
}

/// Callbacks for a definition-order walk of one function and its nested regions.
///
/// For an instruction that owns regions the order is `on_op_enter`, then for
/// every region `on_region_enter` / body / `on_region_exit`, then
/// `on_instruction`. Plain instructions get `on_op_enter` immediately followed by
/// `on_instruction`.
pub trait FunctionVisitor {
    type Error: From<WalkError>;

    fn on_function_enter(&mut self, _function: &Function) -> Result<(), Self::Error> {
        Ok(())
    }
    fn on_op_enter(&mut self, _inst: &Instruction) -> Result<(), Self::Error> {
        Ok(())
    }
    fn on_region_enter(
        &mut self,
        _owner: &Instruction,
        _index: usize,
        _region: &Region,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
    fn on_region_exit(
        &mut self,
        _owner: &Instruction,
        _index: usize,
        _region: &Region,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
    fn on_instruction(&mut self, _inst: &Instruction) -> Result<(), Self::Error> {
        Ok(())
    }
    fn on_function_exit(&mut self, _function: &Function) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub fn walk_function<V: FunctionVisitor + ?Sized>(
    program: &Program,
    function: &Function,
    visitor: &mut V,
) -> Result<(), V::Error> {
    let mut entered = HashSet::new();
    visitor.on_function_enter(function)?;
    walk_body(program, &function.body, visitor, &mut entered)?;
    visitor.on_function_exit(function)
}

fn walk_body<V: FunctionVisitor + ?Sized>(
    program: &Program,
    body: &[Instruction],
    visitor: &mut V,
    entered: &mut HashSet<RegionId>,
) -> Result<(), V::Error> {
    for inst in body {
        visitor.on_op_enter(inst)?;
        for (index, region_id) in inst.op.regions().into_iter().enumerate() {
            let region = program.region(region_id).ok_or(WalkError::MissingRegion {
                region: region_id,
                instruction: inst.id,
            })?;
            if !entered.insert(region_id) {
                return Err(WalkError::RegionReused {
                    region: region_id,
                    instruction: inst.id,
                }
                .into());
            }
            visitor.on_region_enter(inst, index, region)?;
            walk_body(program, &region.body, visitor, entered)?;
            visitor.on_region_exit(inst, index, region)?;
        }
        visitor.on_instruction(inst)?;
    }
    Ok(())
}
