pub type AlleleId = String;
pub type EntityId = String;
pub type EpletId = String;
pub type JobId = String;
pub type SheetName = String;

// an amino acid one letter code, or GAP_CHAR
pub type Residue = char;

// 1-based alignment column
pub type Column = usize;
// 1-based position in the ungapped sequence of one allele
pub type ResiduePosition = usize;
