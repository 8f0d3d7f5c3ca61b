use crate::core::fitness::FitnessMeasure;
use crate::core::models::generation::Generation;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Append-only, line-oriented record of every generation of a run.
///
/// ```text
/// Generation: 0
/// 0: 17; Fitness: 9.42
/// 1: 4; Fitness: 8.87
/// ```
///
/// Rank 0 is the fittest candidate. The file is flushed after every generation so a
/// crashed run still leaves a readable log behind.
pub struct GenerationLog<W: Write> {
    writer: W,
    measure: FitnessMeasure,
}

impl GenerationLog<BufWriter<File>> {
    pub fn create(path: &Path, measure: FitnessMeasure) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), measure))
    }
}

impl<W: Write> GenerationLog<W> {
    pub fn new(writer: W, measure: FitnessMeasure) -> Self {
        Self { writer, measure }
    }

    pub fn write_generation(&mut self, generation: &Generation) -> io::Result<()> {
        writeln!(self.writer, "Generation: {}", generation.number())?;
        for (rank, candidate) in generation.ranked().into_iter().enumerate() {
            match candidate.fitness(self.measure) {
                Some(fitness) => {
                    writeln!(self.writer, "{}: {}; Fitness: {}", rank, candidate.id(), fitness)?
                }
                None => writeln!(self.writer, "{}: {}; Fitness: NaN", rank, candidate.id())?,
            }
        }
        self.writer.flush()
    }

    /// Flushes and hands back the underlying writer.
    pub fn close(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
