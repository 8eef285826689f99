use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Expression text could not be parsed.
    #[snafu(display("cannot parse expression {input:?} at offset {offset}: {reason}"))]
    ExprParse { input: String, offset: usize, reason: &'static str },

    /// Condition text is not a single comparison.
    #[snafu(display("cannot parse condition {input:?}: expected `<lhs> <op> <rhs>`"))]
    ConditionParse { input: String },

    /// Evaluation hit a symbol without a binding.
    #[snafu(display("symbol `{name}` is unbound"))]
    UnboundSymbol { name: String },

    /// Division or modulo by zero during evaluation.
    #[snafu(display("division by zero while evaluating {expr}"))]
    DivisionByZero { expr: String },

    /// Evaluation left the `i64` range.
    #[snafu(display("integer overflow while evaluating {expr}"))]
    Overflow { expr: String },

    /// A value that must be a compile-time constant is symbolic.
    #[snafu(display("expected a constant, got `{expr}`"))]
    NonConstant { expr: String },

    /// Array name does not resolve in the program's array table.
    #[snafu(display("unknown array `{name}`"))]
    UnknownArray { name: String },

    /// Array name is already registered.
    #[snafu(display("array `{name}` already exists"))]
    DuplicateArray { name: String },

    /// Node index does not exist in the state.
    #[snafu(display("node {index} does not exist in state `{state}`"))]
    UnknownNode { state: String, index: usize },

    /// State index does not exist in the program.
    #[snafu(display("state {index} does not exist in program `{program}`"))]
    UnknownState { program: String, index: usize },

    /// Node has a different kind than the caller requires.
    #[snafu(display("expected a {expected} node, found {found}"))]
    UnexpectedNodeKind { expected: &'static str, found: &'static str },

    /// Subset rank differs from the rank of the array it addresses.
    #[snafu(display("subset on `{data}` has rank {actual}, array has rank {expected}"))]
    RankMismatch { data: String, expected: usize, actual: usize },

    /// Edge refers to a connector the node does not declare.
    #[snafu(display("connector `{connector}` is not declared on node `{node}`"))]
    UndeclaredConnector { node: String, connector: String },

    /// Input connector without exactly one edge, or output connector without any.
    #[snafu(display("connector `{connector}` on node `{node}` has {count} edges"))]
    ConnectorArity { node: String, connector: String, count: usize },

    /// Scope entry and exit are not paired.
    #[snafu(display("scope `{scope}` has no matching exit"))]
    UnpairedScope { scope: String },

    /// Dataflow inside a state is cyclic.
    #[snafu(display("state `{state}` contains a dataflow cycle"))]
    DataflowCycle { state: String },
}
