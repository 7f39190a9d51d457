//! Results output formatting (CSV).

use crate::distributed::RowPartition;
use crate::error::Result;
use std::io::Write;

/// Write a replicated result vector as CSV.
///
/// Format:
/// ```csv
/// Index,Value
/// 0,3
/// 1,12
/// ```
pub fn write_vector_csv<W: Write>(values: &[f64], writer: &mut W) -> Result<()> {
    writeln!(writer, "Index,Value")?;
    for (i, v) in values.iter().enumerate() {
        writeln!(writer, "{},{}", i, v)?;
    }
    Ok(())
}

/// Write the row partition table as CSV.
///
/// Format:
/// ```csv
/// Rank,FirstRow,Rows
/// 0,0,3
/// 1,3,3
/// ```
pub fn write_partition_csv<W: Write>(partition: &RowPartition, writer: &mut W) -> Result<()> {
    writeln!(writer, "Rank,FirstRow,Rows")?;
    for rank in 0..partition.num_ranks() {
        writeln!(writer, "{},{},{}", rank, partition.offset(rank), partition.count(rank))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_csv_format() {
        let mut buf = Vec::new();
        write_vector_csv(&[3.0, 12.5], &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "Index,Value\n0,3\n1,12.5\n");
    }

    #[test]
    fn partition_csv_format() {
        let mut buf = Vec::new();
        write_partition_csv(&RowPartition::from_counts(vec![3, 3, 2, 2]), &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "Rank,FirstRow,Rows\n0,0,3\n1,3,3\n2,6,2\n3,8,2\n"
        );
    }
}
