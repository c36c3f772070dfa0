pub mod alphabet;
pub mod fragment;
pub mod graph;
pub mod lexer;
pub mod machine;
pub mod subst;
