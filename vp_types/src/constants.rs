/// Header of the manifest column holding sample identifiers.
pub const MANIFEST_SAMPLE_COLUMN: &str = "sampleID";

/// Manifest rows with this identifier are placeholders, not samples.
pub const MANIFEST_SENTINEL_SAMPLE: &str = "0";

/// Leading columns of a VCF `#CHROM` header line that precede the sample columns.
pub const VCF_FIXED_COLUMNS: [&str; 9] = [
    "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO", "FORMAT",
];

/// Number of leading non-sample columns in an aggregate header.
pub const VCF_NUM_FIXED_COLUMNS: usize = VCF_FIXED_COLUMNS.len();

/// Extension of the per-sample exit status logs written by stage jobs.
pub const EXIT_LOG_EXTENSION: &str = "exit";

/// Directory under the artifact root holding the flat symlink view.
pub const CURRENT_VIEW_DIR: &str = "current";

/// Staging directory, beside a canonical directory, that stage jobs write into.
pub const PARTIAL_DIR: &str = ".partial";

/// Advisory lock file under the artifact root.
pub const LOCK_FILE_NAME: &str = ".varpipe.lock";

/// Name of the run summary written into the run directory.
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Day-granularity timestamp embedded in aggregate names.
pub const AGGREGATE_DATE_FORMAT: &str = "%Y%m%d";
