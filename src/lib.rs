pub mod driver;
pub mod error;
pub mod lexer {
    pub mod lex;
    pub mod util;
}
pub mod parser {
    pub mod ast;
    pub mod recursive_descent;
}
pub mod semantics {
    pub mod const_eval;
    pub mod loop_label;
    pub mod resolver;
    pub mod storage;
    pub mod typechecker;
}
pub mod ir {
    pub mod gen;
}
pub mod codegen {
    pub mod aarch64;
    pub mod fixup;
    pub mod gen;
    pub mod replace_pseudo;
}
pub mod emitter {
    pub mod aarch64;
    pub mod emit;
    pub mod util;
}

pub use driver::{compile, Options};
pub use emitter::util::{Arch, Target};
pub use error::CompileError;
