//! Cascaded sparse stages in one contiguous buffer
//!
//! With `N` stages, `D = ddr_width` and `S = ceil(N / 2D) * 2D` metadata slots,
//! the buffer is addressed in 4-byte words:
//!
//! ```text
//! word 0            nnz_i: u32                 (i < N)
//! half-word S       rows_i: u16, then cols_0   (S + i, S + N)
//! word S            prelu_i: f32               (S + i)
//! word (3S + 1) / 2 stage 0: nnz_0 x {col: u16, row: u16}, nnz_0 x f32
//!                   stage 1: ...
//! ```
//!
//! Stage `i` consumes the output of stage `i - 1`, so only stage 0 records a
//! column count. Entries within a stage are sorted by `(col, row)`.

use tilepack_core::{AlignedBuffer, Element, Error, HardwareConfig, Result, Triplet, TripletSet};
use tracing::{debug, instrument};

const WORD: usize = 4;
const HALF_WORD: usize = 2;

/// One stage: its sparse weights and the leaky coefficient applied after it
#[derive(Debug, Clone, PartialEq)]
pub struct StageInput {
    pub triplets: TripletSet,
    pub prelu: f32,
}

impl StageInput {
    pub fn new(triplets: TripletSet, prelu: f32) -> Self {
        Self { triplets, prelu }
    }
}

#[derive(Clone, Debug)]
pub struct MultiStageLayout {
    buffer: AlignedBuffer<u8>,
    stages: usize,
    slots: usize,
    /// Word offset of each stage block
    offsets: Vec<usize>,
}

impl MultiStageLayout {
    /// Metadata slots reserved for `stages` stages
    pub fn metadata_slots(stages: usize, ddr_width: usize) -> usize {
        let beat = 2 * ddr_width;
        stages.div_ceil(beat) * beat
    }

    /// Words before the first stage block
    pub fn descriptor_words(stages: usize, ddr_width: usize) -> usize {
        (3 * Self::metadata_slots(stages, ddr_width) + 1) / 2
    }

    /// Buffer size for stages with the given entry counts
    pub fn size_bytes_for(config: &HardwareConfig, nnz: &[usize]) -> usize {
        let words = Self::descriptor_words(nnz.len(), config.ddr_width);
        WORD * (words + 2 * nnz.iter().sum::<usize>())
    }

    #[instrument(skip_all, fields(stages = stages.len()))]
    pub fn build(stages: &[StageInput], config: &HardwareConfig) -> Result<Self> {
        config.validate()?;
        let n = stages.len();
        if n == 0 {
            return Err(Error::Configuration(
                "multi-stage layout needs at least one stage".to_string(),
            ));
        }
        let slots = Self::metadata_slots(n, config.ddr_width);
        if n > slots / 2 {
            return Err(Error::Configuration(format!(
                "{n} stages overflow the nnz region of {slots} metadata slots (ddr_width {})",
                config.ddr_width
            )));
        }

        for (i, stage) in stages.iter().enumerate() {
            let rows = stage.triplets.rows();
            if rows > u16::MAX as usize {
                return Err(Error::overflow("stage_rows", rows as u64, u16::MAX));
            }
            if stage.triplets.nnz() > u32::MAX as usize {
                return Err(Error::overflow("stage_nnz", stage.triplets.nnz() as u64, u32::MAX));
            }
            if i == 0 {
                let cols = stage.triplets.cols();
                if cols > u16::MAX as usize {
                    return Err(Error::overflow("stage_cols", cols as u64, u16::MAX));
                }
            } else {
                let upstream = stages[i - 1].triplets.rows();
                if stage.triplets.cols() != upstream {
                    return Err(Error::Configuration(format!(
                        "stage {i} takes {} inputs but stage {} produces {upstream}",
                        stage.triplets.cols(),
                        i - 1
                    )));
                }
            }
        }

        let nnz: Vec<usize> = stages.iter().map(|s| s.triplets.nnz()).collect();
        let descriptor_words = Self::descriptor_words(n, config.ddr_width);
        let mut offsets = Vec::with_capacity(n);
        let mut cursor = descriptor_words;
        for &count in &nnz {
            offsets.push(cursor);
            cursor += 2 * count;
        }

        let size = Self::size_bytes_for(config, &nnz);
        let mut buffer = AlignedBuffer::<u8>::zeroed(size, config.page_size)?;
        let bytes = buffer.as_bytes_mut();

        for (i, stage) in stages.iter().enumerate() {
            put(bytes, WORD * i, &(nnz[i] as u32).to_le_bytes());
            put(bytes, HALF_WORD * (slots + i), &(stage.triplets.rows() as u16).to_le_bytes());
            put(bytes, WORD * (slots + i), &stage.prelu.to_le_bytes());

            let mut entries = stage.triplets.entries().to_vec();
            entries.sort_by(Triplet::by_col);
            let base = WORD * offsets[i];
            let values = base + WORD * nnz[i];
            for (j, t) in entries.iter().enumerate() {
                let value = f32::try_from_f64(t.value).map_err(|_| {
                    Error::Data(format!(
                        "stage {i} entry ({}, {}) value {} does not fit f32",
                        t.row, t.col, t.value
                    ))
                })?;
                put(bytes, base + WORD * j, &(t.col as u16).to_le_bytes());
                put(bytes, base + WORD * j + HALF_WORD, &(t.row as u16).to_le_bytes());
                put(bytes, values + WORD * j, &value.to_le_bytes());
            }
        }
        put(bytes, HALF_WORD * (slots + n), &(stages[0].triplets.cols() as u16).to_le_bytes());

        debug!(bytes = size, slots, descriptor_words, "built multi-stage layout");
        Ok(Self {
            buffer,
            stages: n,
            slots,
            offsets,
        })
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    pub fn metadata_slot_count(&self) -> usize {
        self.slots
    }

    /// Word offset of every stage block
    pub fn stage_offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn nnz(&self, stage: usize) -> Result<usize> {
        self.check_stage(stage)?;
        Ok(self.read_u32(WORD * stage) as usize)
    }

    /// Output dimension of a stage
    pub fn rows(&self, stage: usize) -> Result<usize> {
        self.check_stage(stage)?;
        Ok(self.read_u16(HALF_WORD * (self.slots + stage)) as usize)
    }

    /// Input dimension of a stage
    pub fn cols(&self, stage: usize) -> Result<usize> {
        self.check_stage(stage)?;
        if stage == 0 {
            Ok(self.read_u16(HALF_WORD * (self.slots + self.stages)) as usize)
        } else {
            self.rows(stage - 1)
        }
    }

    pub fn prelu(&self, stage: usize) -> Result<f32> {
        self.check_stage(stage)?;
        Ok(f32::from_le_bytes(self.word(WORD * (self.slots + stage))))
    }

    /// `(col, row)` of entry `j` in a stage
    pub fn index(&self, stage: usize, j: usize) -> Result<(u16, u16)> {
        let at = WORD * self.offsets[self.check_entry(stage, j)?] + WORD * j;
        Ok((self.read_u16(at), self.read_u16(at + HALF_WORD)))
    }

    pub fn value(&self, stage: usize, j: usize) -> Result<f32> {
        let nnz = self.nnz(stage)?;
        let at = WORD * (self.offsets[self.check_entry(stage, j)?] + nnz + j);
        Ok(f32::from_le_bytes(self.word(at)))
    }

    /// Rebuild one stage's triplets in stored order
    pub fn decode_stage(&self, stage: usize) -> Result<TripletSet> {
        let nnz = self.nnz(stage)?;
        let mut entries = Vec::with_capacity(nnz);
        for j in 0..nnz {
            let (col, row) = self.index(stage, j)?;
            let value = self.value(stage, j)?;
            entries.push(Triplet::new(u32::from(row), u32::from(col), f64::from(value)));
        }
        TripletSet::new(self.rows(stage)?, self.cols(stage)?, entries)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn size_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn check_stage(&self, stage: usize) -> Result<()> {
        if stage >= self.stages {
            return Err(Error::overflow("stage", stage as u64, self.stages as u64));
        }
        Ok(())
    }

    fn check_entry(&self, stage: usize, j: usize) -> Result<usize> {
        let nnz = self.nnz(stage)?;
        if j >= nnz {
            return Err(Error::overflow("stage_entry", j as u64, nnz as u64));
        }
        Ok(stage)
    }

    fn word(&self, at: usize) -> [u8; 4] {
        let bytes = self.buffer.as_slice();
        [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
    }

    fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.word(at))
    }

    fn read_u16(&self, at: usize) -> u16 {
        let bytes = self.buffer.as_slice();
        u16::from_le_bytes([bytes[at], bytes[at + 1]])
    }
}

fn put(bytes: &mut [u8], at: usize, field: &[u8]) {
    bytes[at..at + field.len()].copy_from_slice(field);
}
