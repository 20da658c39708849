//! The IR instruction stream
//!
//! A doubly-linked list of instructions backed by an index arena: nodes are
//! never freed, only unlinked, which keeps splicing O(1) and sidesteps
//! aliasing concerns. Labels attach to exactly one instruction; removing an
//! instruction migrates its labels onto its successor so no jump target is
//! ever dropped.

use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone)]
pub struct Instruction {
    pub labels: Vec<String>,
    pub opcode: String,
    pub operand: String,
    pub comment: Option<String>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
pub struct InstructionList {
    nodes: Vec<Instruction>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl InstructionList {
    pub fn new() -> Self {
        InstructionList::default()
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn get(&self, idx: usize) -> &Instruction {
        &self.nodes[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Instruction {
        &mut self.nodes[idx]
    }

    /// Successor by the node's own link. Valid even on an unlinked node,
    /// which lets the pass driver resume iteration after a removal.
    pub fn next_of(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].next
    }

    pub fn prev_of(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].prev
    }

    pub fn push_back(
        &mut self,
        labels: Vec<String>,
        opcode: String,
        operand: String,
        comment: Option<String>,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Instruction {
            labels,
            opcode,
            operand,
            comment,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        idx
    }

    /// Unlink a node. Its labels migrate to the successor; the node's own
    /// links stay intact so iteration over it can continue.
    pub fn remove(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }

        if let Some(n) = next {
            let labels = std::mem::take(&mut self.nodes[idx].labels);
            self.nodes[n].labels.extend(labels);
        }
    }

    /// Iterate linked node indices in program order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.nodes[idx].next;
            Some(idx)
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Map label names to the instruction carrying them.
    pub fn find_label_targets(&self) -> HashMap<String, usize> {
        let mut targets = HashMap::new();
        for idx in self.iter() {
            for label in &self.nodes[idx].labels {
                targets.insert(label.clone(), idx);
            }
        }
        targets
    }

    /// Verify the doubly-linked invariants; used by tests.
    pub fn links_consistent(&self) -> bool {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(idx) = cur {
            if self.nodes[idx].prev != prev {
                return false;
            }
            prev = cur;
            cur = self.nodes[idx].next;
        }
        self.tail == prev
    }

    /// All labels still attached somewhere, in program order.
    pub fn all_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for idx in self.iter() {
            labels.extend(self.nodes[idx].labels.iter().cloned());
        }
        labels
    }

    /// Serialize to the line-oriented text form: each label on its own
    /// line, then `OPCODE OPERAND [COMMENT]`.
    pub fn emit_text(&self, with_comments: bool) -> String {
        let mut out = String::new();
        for idx in self.iter() {
            let ins = &self.nodes[idx];
            for label in &ins.labels {
                let _ = writeln!(out, "{}:", label);
            }
            let mut line = String::new();
            if ins.opcode.is_empty() {
                // inline-assembly passthrough
                line.push_str(&ins.operand);
            } else {
                line.push_str(&ins.opcode);
                if !ins.operand.is_empty() {
                    line.push(' ');
                    line.push_str(&ins.operand);
                }
            }
            if with_comments && let Some(comment) = &ins.comment {
                line.push(' ');
                line.push_str(comment);
            }
            let _ = writeln!(out, "{}", line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(list: &mut InstructionList, opcode: &str, operand: &str) -> usize {
        list.push_back(Vec::new(), opcode.into(), operand.into(), None)
    }

    #[test]
    fn test_push_and_iterate() {
        let mut list = InstructionList::new();
        ins(&mut list, "pushi", "#1");
        ins(&mut list, "pushi", "#2");
        ins(&mut list, "add", "");
        let ops: Vec<&str> = list.iter().map(|i| list.get(i).opcode.as_str()).collect();
        assert_eq!(ops, vec!["pushi", "pushi", "add"]);
        assert!(list.links_consistent());
    }

    #[test]
    fn test_remove_interior() {
        let mut list = InstructionList::new();
        let a = ins(&mut list, "a", "");
        let b = ins(&mut list, "b", "");
        let c = ins(&mut list, "c", "");
        list.remove(b);
        assert!(list.links_consistent());
        let ops: Vec<usize> = list.iter().collect();
        assert_eq!(ops, vec![a, c]);
        // the removed node keeps its own links for iteration resumption
        assert_eq!(list.next_of(b), Some(c));
    }

    #[test]
    fn test_remove_migrates_labels() {
        let mut list = InstructionList::new();
        ins(&mut list, "a", "");
        let b = list.push_back(vec![".L0".into()], "b".into(), String::new(), None);
        let c = ins(&mut list, "c", "");
        list.remove(b);
        assert_eq!(list.get(c).labels, vec![".L0".to_string()]);
        assert_eq!(list.all_labels(), vec![".L0".to_string()]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut list = InstructionList::new();
        let a = ins(&mut list, "a", "");
        let b = ins(&mut list, "b", "");
        list.remove(a);
        assert_eq!(list.head(), Some(b));
        assert!(list.links_consistent());
        list.remove(b);
        assert!(list.is_empty());
        assert!(list.links_consistent());
    }

    #[test]
    fn test_label_targets() {
        let mut list = InstructionList::new();
        ins(&mut list, "jmp", ".L1");
        let t = list.push_back(vec![".L1".into()], "ret".into(), String::new(), None);
        let targets = list.find_label_targets();
        assert_eq!(targets.get(".L1"), Some(&t));
    }

    #[test]
    fn test_emit_text() {
        let mut list = InstructionList::new();
        list.push_back(
            vec!["main".into()],
            "pushi".into(),
            "#7".into(),
            Some("// folded".into()),
        );
        ins(&mut list, "ret", "");
        assert_eq!(list.emit_text(true), "main:\npushi #7 // folded\nret\n");
        assert_eq!(list.emit_text(false), "main:\npushi #7\nret\n");
    }
}
