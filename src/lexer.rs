use std::collections::BTreeMap;
use std::mem;

use thiserror::Error;

use crate::alphabet::Alphabet;
use crate::graph::NodeType;
use crate::machine::Machine;

type LexState = u16;

const TRAP: LexState = 0;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexError {
    #[error("machine has not been compiled")]
    NotCompiled,
    #[error("machine still contains epsilon transitions")]
    Epsilons,
    #[error("too many states for the transition table ({0})")]
    TooManyStates(usize),
    #[error("symbol {0:?} does not fit in a byte column")]
    NonByteSymbol(char),
    #[error("no transition for byte {byte:#04x} at input index {index}")]
    Stuck { index: usize, byte: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lexeme {
    text: String,
    start: usize,
}

impl Lexeme {
    pub fn get_text(&self) -> &str {
        &self.text
    }

    pub fn get_start(&self) -> usize {
        self.start
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[derive(Debug)]
pub struct Lexer {
    table: Vec<LexState>,
    delim: LexState,
    entry: LexState,
    state: LexState,
    index: usize,
    buf: String,
    buf_start: usize,
}

impl Lexer {
    pub fn new(machine: &Machine<char>) -> Result<Self, LexError> {
        let nodes = machine.get_all_reachable_nodes();
        if nodes.is_empty() {
            return Err(LexError::NotCompiled);
        }
        if machine.has_epsilons() {
            return Err(LexError::Epsilons);
        }
        if nodes.len() + 2 > LexState::MAX as usize {
            return Err(LexError::TooManyStates(nodes.len()));
        }

        // Entry row is 1: reachability lists the entry first. Row 0 traps.
        let rows: BTreeMap<_, _> = nodes
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, (i + 1) as LexState))
            .collect();
        let delim = (nodes.len() + 1) as LexState;
        let mut table = vec![TRAP; (nodes.len() + 2) * 256];

        for &id in &nodes {
            let row = rows[&id];
            let node = machine.get_node(id);
            let is_accept = node.node_type == NodeType::End;
            let mut wildcard_to: Option<LexState> = None;
            for (token, target) in &node.next {
                let Some(target) = *target else {
                    continue;
                };
                // An accept-to-entry edge ends the token instead of looping.
                let encoded = if is_accept && Some(target) == machine.get_entry() {
                    delim
                } else {
                    rows[&target]
                };
                if token.is_wildcard() {
                    wildcard_to = Some(encoded);
                } else {
                    let b = byte_column(*token)?;
                    table[row as usize * 256 + b as usize] = encoded;
                }
            }
            if let Some(encoded) = wildcard_to {
                for cell in &mut table[row as usize * 256..(row as usize + 1) * 256] {
                    if *cell == TRAP {
                        *cell = encoded;
                    }
                }
            }
        }

        Ok(Lexer {
            table,
            delim,
            entry: 1,
            state: 1,
            index: 0,
            buf: String::new(),
            buf_start: 0,
        })
    }

    fn get(&self, state: LexState, byte: u8) -> LexState {
        self.table[state as usize * 256 + byte as usize]
    }

    pub fn advance(&mut self, c: char, sink: &mut impl FnMut(Lexeme)) -> Result<(), LexError> {
        let byte = byte_column(c)?;
        let next = self.get(self.state, byte);
        if next == self.delim || next == TRAP {
            self.emit(sink);
            let restarted = self.get(self.entry, byte);
            if restarted == self.delim || restarted == TRAP {
                return Err(LexError::Stuck {
                    index: self.index,
                    byte,
                });
            }
            self.buf_start = self.index;
            self.buf.push(c);
            self.state = restarted;
        } else {
            if self.buf.is_empty() {
                self.buf_start = self.index;
            }
            self.buf.push(c);
            self.state = next;
        }
        self.index += 1;
        Ok(())
    }

    pub fn finish(&mut self, sink: &mut impl FnMut(Lexeme)) {
        self.emit(sink);
        self.state = self.entry;
    }

    pub fn reset(&mut self) {
        self.state = self.entry;
        self.index = 0;
        self.buf.clear();
        self.buf_start = 0;
    }

    pub fn lex(&mut self, text: &str) -> Result<Vec<Lexeme>, LexError> {
        self.reset();
        let mut out = Vec::new();
        let mut sink = |lexeme: Lexeme| out.push(lexeme);
        for c in text.chars() {
            self.advance(c, &mut sink)?;
        }
        self.finish(&mut sink);
        Ok(out)
    }

    fn emit(&mut self, sink: &mut impl FnMut(Lexeme)) {
        if !self.buf.is_empty() {
            sink(Lexeme {
                text: mem::take(&mut self.buf),
                start: self.buf_start,
            });
        }
    }
}

fn byte_column(c: char) -> Result<u8, LexError> {
    u8::try_from(c as u32).map_err(|_| LexError::NonByteSymbol(c))
}
