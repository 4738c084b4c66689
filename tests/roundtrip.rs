//! End-to-end archive tests: byte-exact round trips for every data type,
//! region and grep filtering, concatenation, encryption, and the boundary
//! behaviors around block splitting and line endings.

use std::fs;
use std::path::PathBuf;

use seqzip::piz::{self, PizOptions};
use seqzip::zip::{self, ZipOptions};

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Fixture { _dir: dir, root }
    }

    fn input(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn archive(&self) -> PathBuf {
        self.root.join("out.sqz")
    }
}

fn small_blocks() -> ZipOptions {
    ZipOptions {
        block_size: 256,
        threads: 2,
        ..Default::default()
    }
}

fn roundtrip_with(content: &[u8], name: &str, zopts: &ZipOptions) -> Vec<u8> {
    let fx = Fixture::new();
    let input = fx.input(name, content);
    zip::compress(&[input], &fx.archive(), zopts).unwrap();
    let mut out = Vec::new();
    piz::decompress(&fx.archive(), &mut out, &PizOptions::default()).unwrap();
    out
}

fn assert_roundtrip(content: &[u8], name: &str) {
    let out = roundtrip_with(content, name, &ZipOptions::default());
    assert_eq!(
        out,
        content,
        "round trip of {name} differs:\n got: {:?}\nwant: {:?}",
        String::from_utf8_lossy(&out),
        String::from_utf8_lossy(content)
    );
    // again with tiny blocks so records span block boundaries
    let out = roundtrip_with(content, name, &small_blocks());
    assert_eq!(out, content, "multi-block round trip of {name} differs");
}

const VCF_TWO_LINES: &[u8] = b"\
##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\n\
chr1\t101\t.\tC\tT\t.\tPASS\tAC=2\n";

// ==================== Round-trip identity ====================

#[test]
fn test_vcf_roundtrip() {
    assert_roundtrip(VCF_TWO_LINES, "a.vcf");
}

#[test]
fn test_vcf_roundtrip_with_samples() {
    let content = b"\
##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n\
chr1\t100\trs11\tA\tG\t50\tPASS\tAC=1;DB\tGT:DP\t0/1:12\t1|1:7\n\
chr1\t135\trs12\tC\tT\t99\tPASS\tAC=2\tGT:DP\t0/0\t0/1:\n\
chr2\t7\t.\tG\tGA\t.\tq10\tEND=90\tGT\t0/1\t1/1\n";
    assert_roundtrip(content, "s.vcf");
}

#[test]
fn test_fastq_roundtrip() {
    let content = b"\
@r1 len=10\nACGTACGTAC\n+\nIIIIIIIIII\n\
@r2 len=8\nGGGGCCCC\n+\nJJJJJJJJ\n\
@r3 len=4\nACGT\n+\nFFFF\n";
    assert_roundtrip(content, "reads.fq");
}

#[test]
fn test_fasta_roundtrip_wrapped_sequences() {
    let content = b"\
>seq1 first contig\nACGTACGTACGTACGTACGT\nACGTACGTACGTACGTACGT\n\
;a comment\n\
>seq2\nTTTT\n";
    assert_roundtrip(content, "ref.fa");
}

#[test]
fn test_sam_roundtrip() {
    let content = b"\
@HD\tVN:1.6\tSO:coordinate\n\
@SQ\tSN:chr1\tLN:248956422\n\
r001/1\t99\tchr1\t7\t30\t8M\t=\t37\t39\tTTAGATAA\tFFFFFFFF\tNM:i:0\tMD:Z:8\n\
r001/2\t147\tchr1\t37\t30\t8M\t=\t7\t-39\tCAGCGGCA\t::::::::\n\
r002\t0\tchr2\t9\t30\t3S5M\t*\t0\t0\tGCCTAAGC\t*\n";
    assert_roundtrip(content, "aln.sam");
}

#[test]
fn test_gff3_roundtrip() {
    let content = b"\
##gff-version 3\n\
chr1\thavana\tgene\t11869\t14409\t.\t+\t.\tID=gene1;Name=DDX11L1\n\
chr1\thavana\texon\t11869\t12227\t.\t+\t.\tID=exon1;Parent=gene1\n\
###\n\
chr2\tensembl\tgene\t100\t900\t.\t-\t.\tID=gene2\n";
    assert_roundtrip(content, "ann.gff3");
}

#[test]
fn test_me23_roundtrip() {
    let content = b"\
# This data file generated by 23andMe\n\
rs4477212\t1\t82154\tAA\n\
rs3094315\t1\t752566\tAG\n\
rs3131972\t1\t752721\tG\n\
i713426\tMT\t16499\tA\n";
    assert_roundtrip(content, "genome.txt");
}

// ==================== Boundary behaviors ====================

#[test]
fn test_single_line_input() {
    assert_roundtrip(
        b"##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\nchr1\t1\t.\tA\tT\t.\t.\t.\n",
        "one.vcf",
    );
}

#[test]
fn test_missing_final_newline_preserved() {
    assert_roundtrip(
        b"##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\nchr1\t1\t.\tA\tT\t.\t.\t.",
        "noeol.vcf",
    );
}

#[test]
fn test_windows_line_endings_preserved() {
    assert_roundtrip(
        b"##h\r\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\r\nchr1\t1\t.\tA\tT\t.\t.\t.\r\nchr1\t2\t.\tC\tG\t.\t.\t.\n",
        "crlf.vcf",
    );
}

#[test]
fn test_chrom_spanning_many_blocks() {
    // one chromosome across blocks, then a change of chromosome
    let mut content = b"##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n".to_vec();
    for i in 0..200 {
        content.extend_from_slice(
            format!("chr1\t{}\t.\tA\tG\t.\tPASS\tAC={}\n", 100 + i * 3, i % 5).as_bytes(),
        );
    }
    for i in 0..50 {
        content.extend_from_slice(
            format!("chr2\t{}\t.\tT\tC\t.\tPASS\tAC=1\n", 10 + i * 7).as_bytes(),
        );
    }
    let out = roundtrip_with(&content, "big.vcf", &small_blocks());
    assert_eq!(out, content);
}

#[test]
fn test_fastq_record_spanning_block_boundary() {
    // block size smaller than two records: carried-over bytes must feed
    // the next block, and every block starts on a record boundary
    let mut content = Vec::new();
    for i in 0..40 {
        content.extend_from_slice(
            format!("@read{i} x\nACGTACGTACGTACGTACGTACGTACGT\n+\nIIIIIIIIIIIIIIIIIIIIIIIIIIII\n")
                .as_bytes(),
        );
    }
    let out = roundtrip_with(&content, "span.fq", &small_blocks());
    assert_eq!(out, content);
}

#[test]
fn test_empty_vs_missing_info_subfield() {
    // "AC=" (empty) and absent AC are distinct on the round trip
    let content = b"\
##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t1\t.\tA\tT\t.\t.\tAC=;DB\n\
chr1\t2\t.\tC\tG\t.\t.\tDB\n\
chr1\t3\t.\tG\tA\t.\t.\tAC=5\n";
    assert_roundtrip(content, "info.vcf");
}

// ==================== Region filters ====================

#[test]
fn test_region_filter_exact_subset() {
    let fx = Fixture::new();
    let input = fx.input("r.vcf", VCF_TWO_LINES);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        regions: vec!["chr1:100".into()],
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    let expected = b"\
##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\n";
    assert_eq!(out, expected);
}

#[test]
fn test_region_filter_by_chromosome() {
    let content = b"\
##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t10\t.\tA\tT\t.\t.\t.\n\
chr2\t20\t.\tC\tG\t.\t.\t.\n\
chr1\t30\t.\tG\tC\t.\t.\t.\n";
    let fx = Fixture::new();
    let input = fx.input("c.vcf", content);
    zip::compress(&[input], &fx.archive(), &small_blocks()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        regions: vec!["chr2".into()],
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.ends_with("chr2\t20\t.\tC\tG\t.\t.\t.\n"));
    assert!(!text.contains("chr1\t10"));
    assert!(!text.contains("chr1\t30"));
}

#[test]
fn test_region_filter_end_extends_into_region() {
    // POS 150 with END=200: a filter at 195-205 must include the record
    let content = b"\
##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t150\t.\tA\t<DEL>\t.\tPASS\tEND=200\n\
chr1\t500\t.\tC\tG\t.\tPASS\tAC=1\n";
    let fx = Fixture::new();
    let input = fx.input("e.vcf", content);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        regions: vec!["chr1:195-205".into()],
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("END=200"), "END-extended record missing: {text}");
    assert!(!text.contains("\t500\t"));

    // without the filter the record is included unconditionally
    let mut all = Vec::new();
    piz::decompress(&fx.archive(), &mut all, &PizOptions::default()).unwrap();
    assert_eq!(all, content);
}

#[test]
fn test_region_filter_no_matches_is_empty_not_error() {
    let fx = Fixture::new();
    let input = fx.input("n.vcf", VCF_TWO_LINES);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        regions: vec!["chr9".into()],
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    // the header is still written; no data rows
    assert!(String::from_utf8(out).unwrap().ends_with("INFO\n"));
}

// ==================== Grep ====================

#[test]
fn test_fastq_grep_keeps_whole_records() {
    let content = b"@r1 len=10\nACGTACGTAC\n+\nIIIIIIIIII\n@q7 len=4\nACGT\n+\nFFFF\n";
    let fx = Fixture::new();
    let input = fx.input("g.fq", content);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        grep: Some("r1".into()),
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    assert_eq!(out, b"@r1 len=10\nACGTACGTAC\n+\nIIIIIIIIII\n");

    // no match: empty output, no record separator either, still exit-ok
    let mut out = Vec::new();
    let opts = PizOptions {
        grep: Some("r2".into()),
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_fasta_grep_spans_description_to_description() {
    let content = b">keepme\nAAAA\nCCCC\n>dropme\nGGGG\n>keepme2\nTTTT\n";
    let fx = Fixture::new();
    let input = fx.input("g.fa", content);
    zip::compress(&[input], &fx.archive(), &small_blocks()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        grep: Some("keepme".into()),
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    assert_eq!(out, b">keepme\nAAAA\nCCCC\n>keepme2\nTTTT\n");
}

#[test]
fn test_fasta_grep_combined_with_sequential() {
    // a kept wrapped contig, a grepped-out wrapped contig, another kept
    // one: the dropped contig must not disturb the terminator of the
    // previously kept contig when its lines would have joined
    let content = b">keep1\nAAAA\nCCCC\n>drop\nGGGG\nTTTT\n>keep2\nACGT\nTGCA\n";
    let fx = Fixture::new();
    let input = fx.input("gs.fa", content);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        grep: Some("keep".into()),
        sequential: true,
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    assert_eq!(out, b">keep1\nAAAACCCC\n>keep2\nACGTTGCA\n");

    // grep alone on the same archive keeps the original wrapping
    let mut out = Vec::new();
    let opts = PizOptions {
        grep: Some("keep".into()),
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    assert_eq!(out, b">keep1\nAAAA\nCCCC\n>keep2\nACGT\nTGCA\n");
}

// ==================== FASTA sequential decode ====================

#[test]
fn test_fasta_sequential_flag_and_back() {
    // a 40-base sequence wrapped as two 20-base lines
    let content = b">s\nACGTACGTACGTACGTACGT\nTGCATGCATGCATGCATGCA\n";
    let fx = Fixture::new();
    let input = fx.input("w.fa", content);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    // sequential: one 40-char line
    let mut joined = Vec::new();
    let opts = PizOptions {
        sequential: true,
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut joined, &opts).unwrap();
    assert_eq!(
        joined,
        b">s\nACGTACGTACGTACGTACGTTGCATGCATGCATGCATGCA\n"
    );

    // toggling the flag back reproduces the original split from the
    // same archive
    let mut split = Vec::new();
    piz::decompress(&fx.archive(), &mut split, &PizOptions::default()).unwrap();
    assert_eq!(split, content);
}

// ==================== Concatenation ====================

#[test]
fn test_concat_two_vcf_components() {
    let a = b"\
##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t10\t.\tA\tT\t.\t.\t.\n";
    let b = b"\
##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr2\t20\t.\tC\tG\t.\t.\t.\n";
    let fx = Fixture::new();
    let pa = fx.input("a.vcf", a);
    let pb = fx.input("b.vcf", b);
    zip::compress(&[pa, pb], &fx.archive(), &ZipOptions::default()).unwrap();

    let info = piz::list(&fx.archive(), None).unwrap();
    assert_eq!(info.num_components, 2);

    // the decoded archive equals the byte-concatenation of the inputs,
    // and the whole-archive digest verification passes over it
    let mut out = Vec::new();
    piz::decompress(&fx.archive(), &mut out, &PizOptions::default()).unwrap();
    let mut expected = a.to_vec();
    expected.extend_from_slice(b);
    assert_eq!(out, expected);
}

#[test]
fn test_concat_rejects_mismatched_sample_columns() {
    let a = b"##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\nchr1\t1\t.\tA\tT\t.\t.\t.\n";
    let b = b"##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\nchr1\t2\t.\tC\tG\t.\t.\t.\tGT\t0/1\n";
    let fx = Fixture::new();
    let pa = fx.input("a.vcf", a);
    let pb = fx.input("b.vcf", b);
    let err = zip::compress(&[pa, pb], &fx.archive(), &ZipOptions::default()).unwrap_err();
    assert!(format!("{err}").contains("Cannot concatenate"));
    // no partial archive is left behind
    assert!(!fx.archive().exists());
}

// ==================== Encryption ====================

#[test]
fn test_encrypted_roundtrip() {
    let fx = Fixture::new();
    let input = fx.input("p.vcf", VCF_TWO_LINES);
    let zopts = ZipOptions {
        password: Some("secret".into()),
        ..Default::default()
    };
    zip::compress(&[input], &fx.archive(), &zopts).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        password: Some("secret".into()),
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    assert_eq!(out, VCF_TWO_LINES);
}

#[test]
fn test_wrong_password_detected() {
    let fx = Fixture::new();
    let input = fx.input("p.vcf", VCF_TWO_LINES);
    let zopts = ZipOptions {
        password: Some("secret".into()),
        ..Default::default()
    };
    zip::compress(&[input], &fx.archive(), &zopts).unwrap();

    // no password at all: the archive announces it is encrypted
    let mut out = Vec::new();
    let err = piz::decompress(&fx.archive(), &mut out, &PizOptions::default()).unwrap_err();
    assert!(format!("{err}").contains("password is required"));

    // wrong password: the first-section self test fails
    let mut out = Vec::new();
    let opts = PizOptions {
        password: Some("wrong".into()),
        ..Default::default()
    };
    let err = piz::decompress(&fx.archive(), &mut out, &opts).unwrap_err();
    assert!(format!("{err}").contains("Wrong password"));
    assert!(out.is_empty(), "no output bytes on a failed decrypt");
}

// ==================== Column dropping / metadata ====================

#[test]
fn test_drop_genotypes() {
    let content = b"\
##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n\
chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\tGT:DP\t0/1:12\t1|1:7\n";
    let fx = Fixture::new();
    let input = fx.input("d.vcf", content);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        drop_genotypes: true,
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("chr1\t100\t.\tA\tG\t.\tPASS\tAC=1\n"));
    assert!(!text.contains("GT:DP"));
}

#[test]
fn test_header_only() {
    let fx = Fixture::new();
    let input = fx.input("h.vcf", VCF_TWO_LINES);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut out = Vec::new();
    let opts = PizOptions {
        header_only: true,
        ..Default::default()
    };
    piz::decompress(&fx.archive(), &mut out, &opts).unwrap();
    assert_eq!(
        out,
        b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n"
    );
}

#[test]
fn test_list_metadata() {
    let fx = Fixture::new();
    let content = b"@r\nAC\n+\nII\n";
    let input = fx.input("m.fq", content);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();
    let info = piz::list(&fx.archive(), None).unwrap();
    assert_eq!(info.data_type, "fastq");
    assert_eq!(info.num_components, 1);
    assert_eq!(info.num_vblocks, 1);
    assert!(!info.encrypted);
    assert_eq!(info.txt_len, content.len() as u64);
}

// ==================== Corruption ====================

#[test]
fn test_corrupt_archive_is_rejected() {
    let fx = Fixture::new();
    let input = fx.input("c.vcf", VCF_TWO_LINES);
    zip::compress(&[input], &fx.archive(), &ZipOptions::default()).unwrap();

    let mut bytes = fs::read(fx.archive()).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    fs::write(fx.archive(), &bytes).unwrap();

    let mut out = Vec::new();
    assert!(piz::decompress(&fx.archive(), &mut out, &PizOptions::default()).is_err());
}

#[test]
fn test_optimize_rounds_whitelisted_fields() {
    let content = b"\
##h\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t100\t.\tA\tG\t.\tPASS\tVQSLOD=3.14159;AC=1\n";
    let fx = Fixture::new();
    let input = fx.input("o.vcf", content);
    let zopts = ZipOptions {
        optimize: true,
        ..Default::default()
    };
    zip::compress(&[input], &fx.archive(), &zopts).unwrap();

    let mut out = Vec::new();
    piz::decompress(&fx.archive(), &mut out, &PizOptions::default()).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("VQSLOD=3.1;"), "{text}");
    assert!(text.contains("AC=1\n"));
}
