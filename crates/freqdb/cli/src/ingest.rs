// FreqDB
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::collections::VecDeque;
use std::io::{self, BufRead, Lines};

/// Adjacent whitespace-separated token pairs of a text, read line by line
///
/// The last token of a line pairs with the first token of the next non-empty line.
pub struct Bigrams<R: BufRead> {
    lines: Lines<R>,
    pending: VecDeque<String>,
    prev: Option<String>,
}

impl<R: BufRead> Bigrams<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            pending: VecDeque::new(),
            prev: None,
        }
    }
}

impl<R: BufRead> Iterator for Bigrams<R> {
    type Item = io::Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(token) = self.pending.pop_front() {
                if let Some(prev) = self.prev.replace(token.clone()) {
                    return Some(Ok((prev, token)));
                }
            }

            match self.lines.next()? {
                Ok(line) => self.pending.extend(line.split_whitespace().map(str::to_string)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
