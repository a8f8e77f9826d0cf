pub const GAP_CHAR: char = '-';

// extra alignment columns shown either side of an eplet
pub const DEFAULT_EPLET_WINDOW_BUFFER: usize = 2;

pub const ABANDONED_STATUS: &str = "abandoned";

pub const EXPORT_CATEGORIES: [&str; 5] =
    ["input", "alignment", "sas_scores", "mismatches", "eplets"];

// theoretical maximum accessible surface area per residue in Å²
// (Tien et al. 2013)
pub const MAX_ASA: [(char, f64); 20] =
    [('A', 129.0), ('R', 274.0), ('N', 195.0), ('D', 193.0), ('C', 167.0),
     ('E', 223.0), ('Q', 225.0), ('G', 104.0), ('H', 224.0), ('I', 197.0),
     ('L', 201.0), ('K', 236.0), ('M', 224.0), ('F', 240.0), ('P', 159.0),
     ('S', 155.0), ('T', 172.0), ('W', 285.0), ('Y', 263.0), ('V', 174.0)];
