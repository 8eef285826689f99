use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Ir { source: strata_ir::Error },

    /// A pass found the graph in a shape its rewrite relies on not being possible.
    #[snafu(display("{pass}: structural assumption violated: {reason}"))]
    StructuralAssumption { pass: &'static str, reason: String },

    #[snafu(display("{pass}: no canonical loop at guard state {state}"))]
    LoopNotDetected { pass: &'static str, state: usize },

    #[snafu(display("{pass}: unsupported loop: {reason}"))]
    UnsupportedLoop { pass: &'static str, reason: String },

    #[snafu(display("invalid value for option `{option}`: {reason}"))]
    InvalidConfig { option: &'static str, reason: String },
}
