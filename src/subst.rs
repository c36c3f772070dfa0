use std::collections::BTreeMap;

use crate::machine::{CompileError, Machine};

#[derive(Clone, Debug)]
pub struct Substitutions {
    bank: BTreeMap<String, String>,
}

impl Default for Substitutions {
    fn default() -> Self {
        Self::new()
    }
}

impl Substitutions {
    pub fn new() -> Self {
        let mut subs = Substitutions {
            bank: BTreeMap::new(),
        };
        subs.register("\\d", "(0|1|2|3|4|5|6|7|8|9)");
        subs.register(
            "\\w",
            "(a|b|c|d|e|f|g|h|i|j|k|l|m|n|o|p|q|r|s|t|u|v|w|x|y|z|A|B|C|D|E|F|G|H|I|J|K|L|M|N|O|P|Q|R|S|T|U|V|W|X|Y|Z)",
        );
        subs.register("\\s", "( |\t|\n)");
        subs
    }

    // Values are expanded against the bank once, at registration time.
    pub fn register(&mut self, name: &str, value: &str) {
        let expanded = self.expand(value);
        self.bank.insert(name.to_string(), expanded);
    }

    pub fn expand(&self, pattern: &str) -> String {
        let mut out = pattern.to_string();
        loop {
            let mut changed = false;
            for (name, value) in &self.bank {
                if let Some(at) = out.find(name.as_str()) {
                    out.replace_range(at..at + name.len(), value);
                    changed = true;
                }
            }
            if !changed {
                return out;
            }
        }
    }

    pub fn compile(&self, pattern: &str) -> Result<Machine<char>, CompileError> {
        Machine::from_pattern(&self.expand(pattern))
    }

    pub fn get_substitutions(&self) -> &BTreeMap<String, String> {
        &self.bank
    }
}
