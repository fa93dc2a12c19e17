use crate::process::ExternalTool;
use anyhow::{bail, format_err, Context, Error};
use log::{debug, info};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

const FIMO_GUIDANCE: &str = "fimo is part of the MEME suite (https://meme-suite.org/meme/doc/install.html). \
     Make sure it is installed and on PATH, or set its directory with `with_fimo_dir`.";
const BEDTOOLS_GUIDANCE: &str = "Install bedtools (https://bedtools.readthedocs.io) and make sure it is on PATH.";

/// A 0-based, half-open genomic interval
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interval {
    /// Chromosome
    pub chrom: String,
    /// Start, 0-based
    pub start: u64,
    /// End, exclusive
    pub end: u64,
}

/// One motif occurrence in genome coordinates
#[derive(Clone, Debug, PartialEq)]
pub struct MotifHit {
    /// Chromosome
    pub chrom: String,
    /// Start, 0-based
    pub start: u64,
    /// End, exclusive
    pub end: u64,
    /// Motif identifier from the motif file
    pub motif_id: String,
    /// Alternative motif name, often the TF name
    pub motif_alt_id: String,
    /// `+` or `-`
    pub strand: char,
    /// Log-odds match score
    pub score: f64,
    /// Match p-value
    pub p_value: f64,
}

/// Scans intervals against a motif set
pub trait MotifScanner {
    /// Scored hits of the motifs in `motif_file` inside `intervals`
    fn scan(&self, intervals: &[Interval], motif_file: &Path) -> Result<Vec<MotifHit>, Error>;
}

/// One line of `fimo --text` output, in coordinates of the scanned sequence
#[derive(Clone, Debug, PartialEq)]
pub struct FimoRecord {
    /// Motif identifier
    pub motif_id: String,
    /// Alternative motif name
    pub motif_alt_id: String,
    /// FASTA name of the scanned sequence
    pub sequence_name: String,
    /// 1-based start within the sequence
    pub start: u64,
    /// 1-based inclusive end within the sequence
    pub stop: u64,
    /// `+` or `-`
    pub strand: char,
    /// Log-odds match score
    pub score: f64,
    /// Match p-value
    pub p_value: f64,
}

fn field<'a>(fields: &[&'a str], i: usize, name: &str, line_no: usize) -> Result<&'a str, Error> {
    fields
        .get(i)
        .copied()
        .ok_or_else(|| format_err!("missing {} on line {} of fimo output", name, line_no))
}

/// Parse the tab separated output of `fimo --text`. Header and comment lines are skipped.
pub fn parse_fimo_text(reader: impl BufRead) -> Result<Vec<FimoRecord>, Error> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        if line.is_empty() || line.starts_with('#') || line.starts_with("motif_id") {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let strand = match field(&fields, 5, "strand", line_no)? {
            "+" => '+',
            "-" => '-',
            s => bail!("invalid strand '{}' on line {} of fimo output", s, line_no),
        };
        records.push(FimoRecord {
            motif_id: field(&fields, 0, "motif_id", line_no)?.to_string(),
            motif_alt_id: field(&fields, 1, "motif_alt_id", line_no)?.to_string(),
            sequence_name: field(&fields, 2, "sequence_name", line_no)?.to_string(),
            start: field(&fields, 3, "start", line_no)?.parse()?,
            stop: field(&fields, 4, "stop", line_no)?.parse()?,
            strand,
            score: field(&fields, 6, "score", line_no)?.parse()?,
            p_value: field(&fields, 7, "p-value", line_no)?.parse()?,
        });
    }
    Ok(records)
}

/// Parse a `bedtools getfasta` sequence name, `chrom:start-end`
fn parse_region_name(name: &str) -> Result<(&str, u64), Error> {
    let (chrom, range) = name
        .rsplit_once(':')
        .ok_or_else(|| format_err!("sequence name '{}' is not chrom:start-end", name))?;
    let (start, _) = range
        .split_once('-')
        .ok_or_else(|| format_err!("sequence name '{}' is not chrom:start-end", name))?;
    Ok((chrom, start.parse()?))
}

impl FimoRecord {
    /// Translate to genome coordinates, using the region encoded in the sequence name
    pub fn to_genome_hit(&self) -> Result<MotifHit, Error> {
        let (chrom, offset) = parse_region_name(&self.sequence_name)?;
        if self.start == 0 || self.stop < self.start {
            bail!(
                "invalid match range {}-{} in {}",
                self.start,
                self.stop,
                self.sequence_name
            );
        }
        Ok(MotifHit {
            chrom: chrom.to_string(),
            start: offset + self.start - 1,
            end: offset + self.stop,
            motif_id: self.motif_id.clone(),
            motif_alt_id: self.motif_alt_id.clone(),
            strand: self.strand,
            score: self.score,
            p_value: self.p_value,
        })
    }
}

/// Motif scanning with FIMO over sequences extracted by `bedtools getfasta`
#[derive(Clone, Debug)]
pub struct FimoScanner {
    genome_fasta: PathBuf,
    fimo: ExternalTool,
    bedtools: ExternalTool,
    /// Hits scoring below this are dropped
    pub raw_score_thresh: f64,
    /// p-value threshold passed to fimo
    pub raw_p_value_thresh: f64,
    /// Number of best scoring hits kept
    pub top_n: usize,
}

impl FimoScanner {
    /// Scanner over the indexed genome FASTA `genome_fasta`, using `fimo` and `bedtools` from PATH
    pub fn new(genome_fasta: impl Into<PathBuf>) -> FimoScanner {
        FimoScanner {
            genome_fasta: genome_fasta.into(),
            fimo: ExternalTool::new("fimo", FIMO_GUIDANCE),
            bedtools: ExternalTool::new("bedtools", BEDTOOLS_GUIDANCE),
            raw_score_thresh: 7.0,
            raw_p_value_thresh: 5e-4,
            top_n: 500_000,
        }
    }

    /// Use the `fimo` executable from `dir`
    pub fn with_fimo_dir(mut self, dir: impl AsRef<Path>) -> FimoScanner {
        self.fimo = ExternalTool::new(dir.as_ref().join("fimo"), FIMO_GUIDANCE);
        self
    }

    /// Use an explicit `bedtools` executable
    pub fn with_bedtools(mut self, bedtools: impl Into<PathBuf>) -> FimoScanner {
        self.bedtools = ExternalTool::new(bedtools, BEDTOOLS_GUIDANCE);
        self
    }

    fn check_dependencies(&self) -> Result<(), Error> {
        let fimo = self.fimo.check_version()?;
        let bedtools = self.bedtools.check_version()?;
        debug!("fimo {}, {}", fimo, bedtools);
        Ok(())
    }

    /// Keep hits at or above `raw_score_thresh`, best `top_n` by score, translated to the genome
    fn select_hits(&self, records: Vec<FimoRecord>) -> Result<Vec<MotifHit>, Error> {
        let mut records: Vec<FimoRecord> = records
            .into_iter()
            .filter(|r| r.score >= self.raw_score_thresh)
            .collect();
        records.sort_by(|a, b| b.score.total_cmp(&a.score));
        records.truncate(self.top_n);
        records.iter().map(FimoRecord::to_genome_hit).collect()
    }
}

impl MotifScanner for FimoScanner {
    /// Hits sorted by decreasing score
    fn scan(&self, intervals: &[Interval], motif_file: &Path) -> Result<Vec<MotifHit>, Error> {
        self.check_dependencies()?;
        if intervals.is_empty() {
            return Ok(Vec::new());
        }

        let work_dir = tempfile::tempdir()?;
        let bed_path = work_dir.path().join("regions.bed");
        let fasta_path = work_dir.path().join("regions.fa");
        {
            let mut bed = BufWriter::new(File::create(&bed_path).with_context(|| bed_path.display().to_string())?);
            for iv in intervals {
                writeln!(bed, "{}\t{}\t{}", iv.chrom, iv.start, iv.end)?;
            }
            bed.flush()?;
        }

        let getfasta: Vec<OsString> = vec![
            "getfasta".into(),
            "-fi".into(),
            self.genome_fasta.clone().into(),
            "-bed".into(),
            bed_path.into(),
            "-fo".into(),
            fasta_path.clone().into(),
        ];
        self.bedtools.run(&getfasta, None)?;

        let fimo: Vec<OsString> = vec![
            "--text".into(),
            "--thresh".into(),
            self.raw_p_value_thresh.to_string().into(),
            motif_file.into(),
            fasta_path.into(),
        ];
        let stdout = self.fimo.run(&fimo, None)?;
        let records = parse_fimo_text(stdout.as_slice())?;
        let n_records = records.len();
        let hits = self.select_hits(records)?;
        info!(
            "{} motif matches in {} intervals, kept {}",
            n_records,
            intervals.len(),
            hits.len()
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::MissingDependency;
    use assert_approx_eq::assert_approx_eq;

    const FIMO_OUT: &str = "motif_id\tmotif_alt_id\tsequence_name\tstart\tstop\tstrand\tscore\tp-value\tq-value\tmatched_sequence\n\
MA0139.1\tCTCF\tchr1:1000-1100\t11\t29\t+\t15.2\t1.1e-06\t\tTGGCCACCAGGGGGCGCTA\n\
MA0139.1\tCTCF\tchr1:1000-1100\t40\t58\t-\t6.5\t3.2e-04\t\tTGGCCACCAGGGGGCGCTA\n\
MA0079.3\tSP1\tchr2:500-620\t1\t11\t+\t9.0\t2.0e-05\t\tGCCCCGCCCCC\n";

    #[test]
    fn test_parse_fimo_text() {
        let records = parse_fimo_text(FIMO_OUT.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].motif_alt_id, "CTCF");
        assert_eq!(records[1].strand, '-');
        assert_approx_eq!(records[2].score, 9.0);
        assert_approx_eq!(records[0].p_value, 1.1e-6, 1e-12);

        assert!(parse_fimo_text("m\talt\tchr1:0-10\t1\t5\t*\t1.0\t0.1\n".as_bytes()).is_err());
        assert!(parse_fimo_text("m\talt\tchr1:0-10\t1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_genome_coordinates() {
        let records = parse_fimo_text(FIMO_OUT.as_bytes()).unwrap();
        let hit = records[0].to_genome_hit().unwrap();
        assert_eq!((hit.chrom.as_str(), hit.start, hit.end), ("chr1", 1010, 1029));
        let hit = records[2].to_genome_hit().unwrap();
        assert_eq!((hit.chrom.as_str(), hit.start, hit.end), ("chr2", 500, 511));

        // contig names may contain ':'
        let mut r = records[0].clone();
        r.sequence_name = "HLA-A*01:01:01:01:20-40".to_string();
        let hit = r.to_genome_hit().unwrap();
        assert_eq!((hit.chrom.as_str(), hit.start), ("HLA-A*01:01:01:01", 30));

        r.sequence_name = "chr1".to_string();
        assert!(r.to_genome_hit().is_err());
    }

    #[test]
    fn test_select_hits() {
        let mut scanner = FimoScanner::new("genome.fa");
        let records = parse_fimo_text(FIMO_OUT.as_bytes()).unwrap();
        let hits = scanner.select_hits(records.clone()).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].motif_alt_id, "CTCF");
        assert_eq!(hits[1].motif_alt_id, "SP1");

        scanner.top_n = 1;
        scanner.raw_score_thresh = 0.0;
        let hits = scanner.select_hits(records).unwrap();
        assert_eq!(hits.len(), 1);
        assert_approx_eq!(hits[0].score, 15.2);
    }

    #[test]
    fn test_missing_fimo() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FimoScanner::new("genome.fa").with_fimo_dir(dir.path());
        let err = scanner.scan(&[], Path::new("motifs.meme")).unwrap_err();
        assert!(err.downcast_ref::<MissingDependency>().is_some());
        assert!(err.to_string().contains("MEME suite"));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_with_fake_tools() {
        use crate::test_util::{fake_tool, logged_calls};

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let fimo_out = dir.path().join("fimo.txt");
        std::fs::write(&fimo_out, FIMO_OUT).unwrap();

        fake_tool(
            dir.path(),
            "fimo",
            &format!(
                "if [ \"$1\" = --version ]; then echo 5.5.5; exit 0; fi\n\
                 echo fimo \"$@\" >> {log}\n\
                 cat {out}\n",
                log = log.display(),
                out = fimo_out.display()
            ),
        );
        let bedtools = fake_tool(
            dir.path(),
            "bedtools",
            &format!(
                "if [ \"$1\" = --version ]; then echo bedtools v2.31.0; exit 0; fi\n\
                 echo bedtools \"$@\" >> {log}\n\
                 while [ $# -gt 0 ]; do\n\
                 if [ \"$1\" = -fo ]; then printf '>chr1:1000-1100\\nACGT\\n' > \"$2\"; fi\n\
                 shift\n\
                 done\n",
                log = log.display()
            ),
        );

        let scanner = FimoScanner::new("/ref/genome.fa")
            .with_fimo_dir(dir.path())
            .with_bedtools(bedtools);
        let intervals = vec![
            Interval {
                chrom: "chr1".to_string(),
                start: 1000,
                end: 1100,
            },
            Interval {
                chrom: "chr2".to_string(),
                start: 500,
                end: 620,
            },
        ];
        let hits = scanner.scan(&intervals, Path::new("/ref/motifs.meme")).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].start, 1010);

        let calls = logged_calls(&log);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("bedtools getfasta -fi /ref/genome.fa -bed "));
        assert!(calls[1].starts_with("fimo --text --thresh 0.0005 /ref/motifs.meme "));
    }
}
