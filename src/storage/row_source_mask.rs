// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Row-source masks recorded by the key pass of a vertical merge.
//!
//! Each output row of the key pass records which child iterator it came from and
//! whether it opens a new key group. Value passes replay the same sequence.

use std::sync::{Arc, Mutex};

use crate::common::status::{Result, Status};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowSourceMask {
    pub source: u16,
    pub agg_flag: bool,
}

impl RowSourceMask {
    pub fn new(source: u16, agg_flag: bool) -> Self {
        Self { source, agg_flag }
    }
}

#[derive(Debug, Default)]
pub struct RowSourceMaskBuffer {
    masks: Vec<RowSourceMask>,
    read_pos: usize,
    reading: bool,
}

pub type SharedMaskBuffer = Arc<Mutex<RowSourceMaskBuffer>>;

impl RowSourceMaskBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMaskBuffer {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn write(&mut self, masks: &[RowSourceMask]) -> Result<()> {
        if self.reading {
            return Err(Status::internal("row source mask buffer is in read mode"));
        }
        self.masks.extend_from_slice(masks);
        Ok(())
    }

    /// Rewinds to the first mask. Called once per value pass.
    pub fn flip_to_read(&mut self) {
        self.reading = true;
        self.read_pos = 0;
    }

    pub fn has_remaining(&self) -> bool {
        self.reading && self.read_pos < self.masks.len()
    }

    pub fn current(&self) -> Option<RowSourceMask> {
        if !self.reading {
            return None;
        }
        self.masks.get(self.read_pos).copied()
    }

    pub fn advance(&mut self) {
        if self.read_pos < self.masks.len() {
            self.read_pos += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_after_each_flip() {
        let mut buf = RowSourceMaskBuffer::new();
        buf.write(&[RowSourceMask::new(1, true), RowSourceMask::new(0, false)])
            .unwrap();
        assert!(!buf.has_remaining());
        buf.flip_to_read();
        assert!(buf.write(&[RowSourceMask::new(0, true)]).is_err());
        assert_eq!(buf.current(), Some(RowSourceMask::new(1, true)));
        buf.advance();
        buf.advance();
        assert!(!buf.has_remaining());
        buf.flip_to_read();
        assert_eq!(buf.current().map(|m| m.source), Some(1));
    }
}
