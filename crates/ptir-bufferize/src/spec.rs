//! PTIR: the declarative SSA tensor program the analysis runs on.
//!
//! A [`Program`] owns a list of functions plus every region referenced by their
//! structured control-flow ops. Values are named by [`ValueId`]s that are unique
//! across a function and all regions reachable from it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::{fmt, fs, io, mem};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Program format version accepted by this crate.
pub const SPEC_VERSION: &str = "ptir.v0.4";

fn default_spec_version() -> String {
    SPEC_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I1,
    Si8,
    Ui8,
    Si16,
    Ui16,
    Si32,
    Ui32,
    Si64,
    Ui64,
    Bf16,
    F16,
    F32,
    F64,
}

impl DType {
    pub fn byte_width(self) -> usize {
        match self {
            DType::I1 | DType::Si8 | DType::Ui8 => 1,
            DType::Si16 | DType::Ui16 | DType::Bf16 | DType::F16 => 2,
            DType::Si32 | DType::Ui32 | DType::F32 => 4,
            DType::Si64 | DType::Ui64 | DType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::I1 => "i1",
            DType::Si8 => "si8",
            DType::Ui8 => "ui8",
            DType::Si16 => "si16",
            DType::Ui16 => "ui16",
            DType::Si32 => "si32",
            DType::Ui32 => "ui32",
            DType::Si64 => "si64",
            DType::Ui64 => "ui64",
            DType::Bf16 => "bf16",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

/// One axis extent; dynamic axes carry a symbol such as `batch`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic(String),
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(extent) => write!(f, "{extent}"),
            Dimension::Dynamic(symbol) => write!(f, "?{symbol}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<Dimension>);

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.0
    }

    /// Number of elements, or `None` when any axis is dynamic.
    pub fn element_count(&self) -> Option<usize> {
        self.dims().iter().try_fold(1usize, |count, dim| match dim {
            Dimension::Static(extent) => count.checked_mul(*extent),
            Dimension::Dynamic(_) => None,
        })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (axis, dim) in self.dims().iter().enumerate() {
            if axis > 0 {
                f.write_str("x")?;
            }
            write!(f, "{dim}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn byte_len(&self) -> Option<usize> {
        self.shape
            .element_count()?
            .checked_mul(self.dtype.byte_width())
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.dtype.name(), self.shape)
    }
}

/// Inline constant data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Vec<u8>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Vec<u8>) -> Self {
        Self { spec, bytes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementwiseUnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Tanh,
    Rsqrt,
    Reciprocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
}

/// Batch and contracting axes of a `dot_general`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DotDims {
    pub lhs_batch: Vec<usize>,
    pub rhs_batch: Vec<usize>,
    pub lhs_contract: Vec<usize>,
    pub rhs_contract: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub usize);

/// Operand 0 is the `i1` predicate; the remaining operands become the
/// parameters of whichever branch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondSpec {
    pub true_region: RegionId,
    pub false_region: RegionId,
}

/// Operands are the initial carries. `cond_region` yields one `i1`,
/// `body_region` yields the next carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhileSpec {
    pub cond_region: RegionId,
    pub body_region: RegionId,
}

/// Operands are `carry_count` initial carries followed by the scanned inputs.
/// The body takes the carries plus one slice per scanned input and yields the
/// next carries followed by `scan_output_count` per-step outputs, which the op
/// stacks into its trailing results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSpec {
    pub body_region: RegionId,
    pub carry_count: usize,
    pub scan_output_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum CustomCallAttr {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
    I64Array(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCallSpec {
    pub target: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, CustomCallAttr>,
}

impl CustomCallSpec {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: CustomCallAttr) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key)? {
            CustomCallAttr::I64(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    Tuple(Vec<ValueType>),
}

impl ValueType {
    /// Resolves the type nested at `path`; an empty path is the type itself.
    pub fn at_path(&self, path: &[usize]) -> Option<&ValueType> {
        path.iter().try_fold(self, |current, &index| match current {
            ValueType::Tuple(elements) => elements.get(index),
            ValueType::Tensor(_) => None,
        })
    }

    /// Paths of every tensor leaf, depth first.
    pub fn tensor_paths(&self) -> Vec<Vec<usize>> {
        fn walk(ty: &ValueType, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
            match ty {
                ValueType::Tensor(_) => out.push(prefix.clone()),
                ValueType::Tuple(elements) => {
                    for (index, element) in elements.iter().enumerate() {
                        prefix.push(index);
                        walk(element, prefix, out);
                        prefix.pop();
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(self, &mut Vec::new(), &mut out);
        out
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Tensor(spec) => write!(f, "{spec}"),
            ValueType::Tuple(elements) => {
                f.write_str("(")?;
                for (index, element) in elements.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    TupleElement { tuple: ValueId, index: usize },
    Literal(TensorLiteral),
}

impl Operand {
    /// The SSA value this operand reads, if any.
    pub fn value_id(&self) -> Option<ValueId> {
        match self {
            Operand::Value(id) => Some(*id),
            Operand::TupleElement { tuple, .. } => Some(*tuple),
            Operand::Literal(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(id) => write!(f, "%{}", id.0),
            Operand::TupleElement { tuple, index } => write!(f, "%{}.{index}", tuple.0),
            Operand::Literal(literal) => write!(f, "literal<{}>", literal.spec),
        }
    }
}

/// PTIR operations. Shape and dtype of a result always come from the
/// instruction's `output`; payloads only carry what the output cannot express.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Constant(TensorLiteral),
    Iota { axis: usize },
    /// Uninitialized tensor of the output type, used as a write destination.
    Empty,
    ElementwiseUnary(ElementwiseUnaryOp),
    ElementwiseBinary(ElementwiseBinaryOp),
    Compare(ComparisonOp),
    Select,
    Cast,
    StopGradient,
    Reshape,
    Transpose { perm: Vec<usize> },
    Slice { starts: Vec<usize>, sizes: Vec<usize> },
    BroadcastTo,
    Concat { axis: usize },
    DotGeneral(DotDims),
    Reduce { kind: ReduceKind, axes: Vec<usize> },
    Gather { axis: usize },
    DynamicSlice { sizes: Vec<usize> },
    /// Operands: destination, update, start indices.
    DynamicUpdateSlice,
    /// Operands: destination, indices, updates.
    ScatterAdd { axis: usize },
    Cond(CondSpec),
    While(WhileSpec),
    Scan(ScanSpec),
    /// Block-argument merge of values arriving from divergent predecessors.
    Phi,
    CustomCall(CustomCallSpec),
}

impl Operation {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "constant",
            Operation::Iota { .. } => "iota",
            Operation::Empty => "empty",
            Operation::ElementwiseUnary(_) => "unary",
            Operation::ElementwiseBinary(_) => "binary",
            Operation::Compare(_) => "compare",
            Operation::Select => "select",
            Operation::Cast => "cast",
            Operation::StopGradient => "stop_gradient",
            Operation::Reshape => "reshape",
            Operation::Transpose { .. } => "transpose",
            Operation::Slice { .. } => "slice",
            Operation::BroadcastTo => "broadcast_to",
            Operation::Concat { .. } => "concat",
            Operation::DotGeneral(_) => "dot_general",
            Operation::Reduce { .. } => "reduce",
            Operation::Gather { .. } => "gather",
            Operation::DynamicSlice { .. } => "dynamic_slice",
            Operation::DynamicUpdateSlice => "dynamic_update_slice",
            Operation::ScatterAdd { .. } => "scatter_add",
            Operation::Cond(_) => "cond",
            Operation::While(_) => "while",
            Operation::Scan(_) => "scan",
            Operation::Phi => "phi",
            Operation::CustomCall(_) => "custom_call",
        }
    }

    /// Regions run by this op, in execution order.
    pub fn regions(&self) -> Vec<RegionId> {
        match self {
            Operation::Cond(spec) => vec![spec.true_region, spec.false_region],
            Operation::While(spec) => vec![spec.cond_region, spec.body_region],
            Operation::Scan(spec) => vec![spec.body_region],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<Operand>,
    pub output: ValueType,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{} = {}", self.id.0, self.op.mnemonic())?;
        match &self.op {
            Operation::ElementwiseUnary(op) => write!(f, ".{op:?}")?,
            Operation::ElementwiseBinary(op) => write!(f, ".{op:?}")?,
            Operation::Compare(op) => write!(f, ".{op:?}")?,
            Operation::CustomCall(spec) => write!(f, " @{}", spec.target)?,
            _ => {}
        }
        let regions = self.op.regions();
        if !regions.is_empty() {
            let names = regions
                .iter()
                .map(|region| format!("^r{}", region.0))
                .collect::<Vec<_>>();
            write!(f, " [{}]", names.join(", "))?;
        }
        let operands = self
            .operands
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        write!(f, "({}) : {}", operands.join(", "), self.output)
    }
}

/// Body of a structured op. `result_ids` are the yielded values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub parameters: Vec<ValueType>,
    pub parameter_ids: Vec<ValueId>,
    pub body: Vec<Instruction>,
    pub results: Vec<ValueType>,
    pub result_ids: Vec<ValueId>,
}

/// `result_ids` are written to the caller-supplied output buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<ValueType>,
    pub parameter_ids: Vec<ValueId>,
    pub results: Vec<ValueType>,
    pub body: Vec<Instruction>,
    pub result_ids: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default = "default_spec_version")]
    pub spec_version: String,
    pub entry: String,
    pub functions: Vec<Function>,
    #[serde(default)]
    pub regions: Vec<Region>,
}

#[derive(Debug, Error)]
pub enum ProgramSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("unsupported program version `{0}` (expected {})", SPEC_VERSION)]
    UnsupportedVersion(String),
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error(transparent)]
    Serialization(#[from] ProgramSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Program {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            spec_version: default_spec_version(),
            entry: entry.into(),
            functions: Vec::new(),
            regions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = regions;
        self
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.iter().find(|region| region.id == id)
    }

    fn checked(self) -> Result<Self, ProgramSerdeError> {
        if self.spec_version != SPEC_VERSION {
            return Err(ProgramSerdeError::UnsupportedVersion(self.spec_version));
        }
        Ok(self)
    }

    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        serde_json::from_str::<Program>(src)?.checked()
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, ProgramSerdeError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, ProgramSerdeError> {
        bincode::deserialize::<Program>(bytes)?.checked()
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let src = fs::read_to_string(path)?;
        Ok(Program::from_json_str(&src)?)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        fs::write(path, self.to_bincode_bytes()?)?;
        Ok(())
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let bytes = fs::read(path)?;
        Ok(Program::from_bincode_slice(&bytes)?)
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, ids: &[ValueId], types: &[ValueType]) -> fmt::Result {
    for (index, (id, ty)) in ids.iter().zip(types).enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "%{}: {ty}", id.0)?;
    }
    Ok(())
}

fn write_ids(f: &mut fmt::Formatter<'_>, ids: &[ValueId]) -> fmt::Result {
    let ids = ids
        .iter()
        .map(|id| format!("%{}", id.0))
        .collect::<Vec<_>>();
    f.write_str(&ids.join(", "))
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program @{} ({})", self.entry, self.spec_version)?;
        for function in &self.functions {
            write!(f, "func @{}(", function.name)?;
            write_values(f, &function.parameter_ids, &function.parameters)?;
            f.write_str(") -> (")?;
            write_ids(f, &function.result_ids)?;
            writeln!(f, ") {{")?;
            for inst in &function.body {
                writeln!(f, "  {inst}")?;
            }
            writeln!(f, "}}")?;
        }
        for region in &self.regions {
            write!(f, "region ^r{}(", region.id.0)?;
            write_values(f, &region.parameter_ids, &region.parameters)?;
            writeln!(f, ") {{")?;
            for inst in &region.body {
                writeln!(f, "  {inst}")?;
            }
            f.write_str("  yield ")?;
            write_ids(f, &region.result_ids)?;
            writeln!(f, "\n}}")?;
        }
        Ok(())
    }
}

/// Builds one function and the regions it uses.
///
/// All values share one id counter, so ids never collide between the function
/// body and its regions.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    next_value: u32,
    next_region: usize,
    params: Vec<(ValueId, ValueType)>,
    body: Vec<Instruction>,
    regions: Vec<Region>,
    types: HashMap<ValueId, ValueType>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self, ty: &ValueType) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.types.insert(id, ty.clone());
        id
    }

    pub fn add_parameter(&mut self, ty: ValueType) -> ValueId {
        let id = self.allocate(&ty);
        self.params.push((id, ty));
        id
    }

    pub fn emit_single(
        &mut self,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> ValueId {
        let id = self.allocate(&output);
        self.body.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }

    /// Emits a region whose body is produced by `build`.
    ///
    /// `build` receives the parameter ids and returns the yielded ids. Anything
    /// emitted inside `build` lands in the region, not in the enclosing body.
    pub fn build_region<F>(&mut self, parameters: Vec<ValueType>, build: F) -> RegionId
    where
        F: FnOnce(&mut ProgramBuilder, &[ValueId]) -> Vec<ValueId>,
    {
        let id = RegionId(self.next_region);
        self.next_region += 1;

        let parameter_ids: Vec<ValueId> = parameters.iter().map(|ty| self.allocate(ty)).collect();
        let enclosing = mem::take(&mut self.body);
        let result_ids = build(self, &parameter_ids);
        let body = mem::replace(&mut self.body, enclosing);
        let results = self.types_of(&result_ids);
        self.regions.push(Region {
            id,
            parameters,
            parameter_ids,
            body,
            results,
            result_ids,
        });
        id
    }

    fn types_of(&self, ids: &[ValueId]) -> Vec<ValueType> {
        ids.iter()
            .map(|id| {
                self.types
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| panic!("value %{} was not built by this builder", id.0))
            })
            .collect()
    }

    /// Single-function program whose entry is the built function.
    ///
    /// Panics if a returned or yielded id was not allocated by this builder.
    pub fn finish_program(self, name: impl Into<String>, result_ids: Vec<ValueId>) -> Program {
        let name = name.into();
        let results = self.types_of(&result_ids);
        let (parameter_ids, parameters) = self.params.into_iter().unzip();
        let function = Function {
            name: name.clone(),
            parameters,
            parameter_ids,
            results,
            body: self.body,
            result_ids,
        };
        Program::new(name)
            .with_functions(vec![function])
            .with_regions(self.regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_tensor(dims: &[usize]) -> ValueType {
        let dims = dims.iter().map(|&d| Dimension::Static(d)).collect::<Vec<_>>();
        ValueType::Tensor(TensorSpec::new(DType::F32, Shape::new(dims)))
    }

    #[test]
    fn region_values_do_not_leak_into_enclosing_body() {
        let ty = f32_tensor(&[2]);
        let mut b = ProgramBuilder::new();
        let x = b.add_parameter(ty.clone());
        let region = b.build_region(vec![ty.clone()], |b, params| {
            vec![b.emit_single(
                Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg),
                vec![Operand::Value(params[0])],
                ty.clone(),
            )]
        });
        let y = b.emit_single(
            Operation::Scan(ScanSpec {
                body_region: region,
                carry_count: 1,
                scan_output_count: 0,
            }),
            vec![Operand::Value(x)],
            ty,
        );
        let program = b.finish_program("main", vec![y]);

        let function = program.function("main").expect("main");
        assert_eq!(function.body.len(), 1);
        let region = program.region(region).expect("region");
        assert_eq!(region.parameter_ids, vec![ValueId(1)]);
        assert_eq!(region.result_ids, vec![ValueId(2)]);
        assert_eq!(y, ValueId(3));
    }

    #[test]
    fn text_form_lists_functions_then_regions() {
        let ty = f32_tensor(&[2, 3]);
        let mut b = ProgramBuilder::new();
        let x = b.add_parameter(ty.clone());
        let y = b.emit_single(Operation::Reshape, vec![Operand::Value(x)], f32_tensor(&[6]));
        let program = b.finish_program("main", vec![y]);

        assert_eq!(
            program.to_text(),
            "program @main (ptir.v0.4)\n\
             func @main(%0: f32[2x3]) -> (%1) {\n  \
             %1 = reshape(%0) : f32[6]\n\
             }\n"
        );
    }

    #[test]
    fn dynamic_axes_have_no_element_count() {
        let shape = Shape::new(vec![
            Dimension::Dynamic("batch".to_string()),
            Dimension::Static(3),
        ]);
        assert_eq!(shape.dims().len(), 2);
        assert_eq!(shape.element_count(), None);
        assert_eq!(TensorSpec::new(DType::Bf16, shape).to_string(), "bf16[?batchx3]");
    }

    #[test]
    fn foreign_versions_are_rejected() {
        let mut program = Program::new("main");
        program.spec_version = "ptir.v9".to_string();
        let json = program.to_json_string().expect("serialize");
        assert!(matches!(
            Program::from_json_str(&json),
            Err(ProgramSerdeError::UnsupportedVersion(version)) if version == "ptir.v9"
        ));
    }
}
