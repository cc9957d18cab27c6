use anyhow::Result;
use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Float64Type, Int64Type, Time64MicrosecondType, TimeUnit,
    TimestampMicrosecondType,
};
use fanload::{
    BinaryEncoding, CanonicalType, DataFrameResult, ErrorCode, LoaderConfig, ReadRequest,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    url: String,
}

fn fixture() -> Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fixture.db");
    let conn = rusqlite::Connection::open(&path)?;
    conn.execute_batch(
        "CREATE TABLE test_table (
             test_int INTEGER NOT NULL,
             test_nullint INTEGER,
             test_str TEXT,
             test_float REAL,
             test_bool BOOLEAN,
             test_date DATE,
             test_time TIME,
             test_datetime DATETIME
         );
         INSERT INTO test_table VALUES (1, 3, 'str1', NULL, 1, '1996-03-13', '08:12:40', '2007-01-01 10:00:19');
         INSERT INTO test_table VALUES (2, NULL, 'str2', 2.2, 0, '1996-01-30', '10:03:00', '2005-01-01 22:03:00');
         INSERT INTO test_table VALUES (0, 5, 'こんにちは', 3.1, NULL, '1996-02-28', '23:00:10', NULL);
         INSERT INTO test_table VALUES (3, 7, 'b', 3, 0, '2020-01-12', '23:00:10', '1987-01-01 11:00:00');
         INSERT INTO test_table VALUES (4, 9, 'Ha好ち😁ðy̆', 7.8, NULL, '1996-04-20', '18:30:00', NULL);
         INSERT INTO test_table VALUES (1314, 2, NULL, -10, 1, NULL, '18:30:00', '2007-10-01 10:32:00');

         CREATE TABLE blobs (id INTEGER, data BLOB);
         INSERT INTO blobs VALUES (1, x'00ff10'), (2, NULL), (3, x'');",
    )?;
    let url = format!("sqlite://{}", path.display());
    Ok(Fixture { _dir: dir, url })
}

fn ints(frame: &DataFrameResult, name: &str) -> Vec<Option<i64>> {
    frame
        .column(name)
        .unwrap()
        .array()
        .as_primitive::<Int64Type>()
        .iter()
        .collect()
}

fn strings(frame: &DataFrameResult, name: &str) -> Vec<Option<String>> {
    frame
        .column(name)
        .unwrap()
        .array()
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(String::from))
        .collect()
}

#[tokio::test]
async fn test_read_whole_table() -> Result<()> {
    let fx = fixture()?;
    let frame = fanload::read_sql(&fx.url, &ReadRequest::query("SELECT * FROM test_table")).await?;

    assert_eq!(frame.row_count(), 6);
    assert_eq!(
        frame.column_names(),
        vec![
            "test_int",
            "test_nullint",
            "test_str",
            "test_float",
            "test_bool",
            "test_date",
            "test_time",
            "test_datetime"
        ]
    );
    let types: Vec<CanonicalType> = frame.schema().iter().map(|c| c.canonical).collect();
    assert_eq!(
        types,
        vec![
            CanonicalType::Int64,
            CanonicalType::Int64,
            CanonicalType::Utf8,
            CanonicalType::Float64,
            CanonicalType::Boolean,
            CanonicalType::Date,
            CanonicalType::Time,
            CanonicalType::DateTime,
        ]
    );

    assert_eq!(ints(&frame, "test_int"), vec![Some(1), Some(2), Some(0), Some(3), Some(4), Some(1314)]);
    assert_eq!(ints(&frame, "test_nullint"), vec![Some(3), None, Some(5), Some(7), Some(9), Some(2)]);
    assert_eq!(
        strings(&frame, "test_str"),
        vec![
            Some("str1".to_string()),
            Some("str2".to_string()),
            Some("こんにちは".to_string()),
            Some("b".to_string()),
            Some("Ha好ち😁ðy̆".to_string()),
            None,
        ]
    );

    let floats: Vec<Option<f64>> = frame
        .column("test_float")?
        .array()
        .as_primitive::<Float64Type>()
        .iter()
        .collect();
    assert_eq!(floats, vec![None, Some(2.2), Some(3.1), Some(3.0), Some(7.8), Some(-10.0)]);

    let bools: Vec<Option<bool>> = frame.column("test_bool")?.array().as_boolean().iter().collect();
    assert_eq!(bools, vec![Some(true), Some(false), None, Some(false), None, Some(true)]);

    let dates = frame.column("test_date")?;
    assert_eq!(dates.data_type(), &DataType::Date32);
    let dates: Vec<Option<i32>> = dates.array().as_primitive::<Date32Type>().iter().collect();
    assert_eq!(dates, vec![Some(9568), Some(9525), Some(9554), Some(18273), Some(9606), None]);

    let times = frame.column("test_time")?;
    assert_eq!(times.data_type(), &DataType::Time64(TimeUnit::Microsecond));
    assert_eq!(times.array().as_primitive::<Time64MicrosecondType>().value(0), 29_560_000_000);

    let stamps = frame.column("test_datetime")?;
    assert_eq!(stamps.data_type(), &DataType::Timestamp(TimeUnit::Microsecond, None));
    let stamps = stamps.array().as_primitive::<TimestampMicrosecondType>();
    assert_eq!(stamps.value(0), 1_167_645_619_000_000);
    assert!(stamps.is_null(2));

    let batch = frame.to_record_batch()?;
    assert_eq!(batch.num_rows(), 6);
    assert_eq!(batch.num_columns(), 8);
    Ok(())
}

#[tokio::test]
async fn test_partitioned_read_matches_unpartitioned() -> Result<()> {
    let fx = fixture()?;
    let whole = fanload::read_sql(&fx.url, &ReadRequest::query("SELECT * FROM test_table")).await?;

    for num in [1, 2, 3, 7] {
        let request = ReadRequest::query("SELECT * FROM test_table").partition_on("test_int", num);
        let split = fanload::read_sql(&fx.url, &request).await?;
        assert_eq!(split.schema(), whole.schema(), "schema differs for {} partitions", num);
        assert_eq!(split.row_count(), whole.row_count());
        assert_eq!(ints(&split, "test_int"), ints(&whole, "test_int"));
        assert_eq!(strings(&split, "test_str"), strings(&whole, "test_str"));
    }
    Ok(())
}

#[tokio::test]
async fn test_partition_with_explicit_range_and_parallelism() -> Result<()> {
    let fx = fixture()?;
    let config = LoaderConfig {
        parallelism: Some(2),
        ..Default::default()
    };
    let request = ReadRequest::query("SELECT test_int, test_str FROM test_table")
        .partition_on("test_int", 4)
        .partition_range(0, 3);
    let frame = fanload::read_sql_with_config(&fx.url, &request, &config).await?;

    // Rows outside the supplied range are not read.
    assert_eq!(ints(&frame, "test_int"), vec![Some(0), Some(1), Some(2), Some(3)]);
    Ok(())
}

#[tokio::test]
async fn test_single_partition_honours_explicit_range() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::query("SELECT test_int FROM test_table")
        .partition_on("test_int", 1)
        .partition_range(0, 3);
    let frame = fanload::read_sql(&fx.url, &request).await?;
    assert_eq!(ints(&frame, "test_int"), vec![Some(1), Some(2), Some(0), Some(3)]);
    Ok(())
}

#[tokio::test]
async fn test_single_row_split_into_empty_partitions() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::query("SELECT * FROM test_table WHERE test_int = 1")
        .partition_on("test_int", 3);

    let sql = fanload::partition_sql(
        &fx.url,
        "SELECT * FROM test_table WHERE test_int = 1",
        "test_int",
        3,
        None,
    )
    .await?;
    assert_eq!(sql.len(), 3);

    let frame = fanload::read_sql(&fx.url, &request).await?;
    assert_eq!(frame.row_count(), 1);
    assert_eq!(strings(&frame, "test_str"), vec![Some("str1".to_string())]);
    Ok(())
}

#[tokio::test]
async fn test_query_list_keeps_input_order() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::queries([
        "SELECT test_int FROM test_table WHERE test_int > 3",
        "SELECT test_int FROM test_table WHERE test_int = 0",
        "SELECT test_int FROM test_table WHERE test_int < 0",
    ]);
    let frame = fanload::read_sql(&fx.url, &request).await?;
    assert_eq!(ints(&frame, "test_int"), vec![Some(4), Some(1314), Some(0)]);

    let union = fanload::read_sql(
        &fx.url,
        &ReadRequest::query(
            "SELECT test_int FROM test_table WHERE test_int > 3 OR test_int = 0 OR test_int < 0",
        ),
    )
    .await?;
    assert_eq!(union.schema(), frame.schema());
    let mut split = ints(&frame, "test_int");
    let mut whole = ints(&union, "test_int");
    split.sort();
    whole.sort();
    assert_eq!(split, whole);
    Ok(())
}

#[tokio::test]
async fn test_partition_on_aggregation_matches_unpartitioned() -> Result<()> {
    let fx = fixture()?;
    let query = "SELECT test_bool, SUM(test_int) AS test_int FROM test_table GROUP BY test_bool";
    let whole = fanload::read_sql(&fx.url, &ReadRequest::query(query)).await?;
    let split = fanload::read_sql(&fx.url, &ReadRequest::query(query).partition_on("test_int", 2)).await?;

    assert_eq!(split.schema(), whole.schema());
    assert_eq!(whole.schema()[0].canonical, CanonicalType::Boolean);
    assert_eq!(whole.schema()[1].canonical, CanonicalType::Int64);

    let rows = |frame: &DataFrameResult| -> Vec<(Option<bool>, Option<i64>)> {
        let bools = frame.column("test_bool").unwrap().array().as_boolean().clone();
        let mut pairs: Vec<_> = bools.iter().zip(ints(frame, "test_int")).collect();
        pairs.sort();
        pairs
    };
    assert_eq!(rows(&split), rows(&whole));
    assert_eq!(
        rows(&whole),
        vec![(None, Some(4)), (Some(false), Some(5)), (Some(true), Some(1315))]
    );
    Ok(())
}

#[tokio::test]
async fn test_group_by_bool_schema_is_stable_across_partitions() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::queries([
        "SELECT test_bool, SUM(test_int) AS total FROM test_table WHERE test_bool = 1 GROUP BY test_bool",
        "SELECT test_bool, SUM(test_int) AS total FROM test_table WHERE test_bool = 0 GROUP BY test_bool",
    ]);
    let frame = fanload::read_sql(&fx.url, &request).await?;
    assert_eq!(frame.schema()[0].canonical, CanonicalType::Boolean);
    assert_eq!(frame.schema()[1].canonical, CanonicalType::Int64);
    assert_eq!(ints(&frame, "total"), vec![Some(1315), Some(5)]);
    Ok(())
}

#[tokio::test]
async fn test_untyped_null_column_is_refined_by_other_partition() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::queries([
        "SELECT MAX(test_nullint) AS m FROM test_table WHERE test_int > 10000",
        "SELECT MAX(test_nullint) AS m FROM test_table",
    ]);
    let frame = fanload::read_sql(&fx.url, &request).await?;
    assert_eq!(frame.schema()[0].canonical, CanonicalType::Int64);
    assert_eq!(ints(&frame, "m"), vec![None, Some(9)]);
    Ok(())
}

#[tokio::test]
async fn test_empty_partition_column_yields_empty_frame() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::query("SELECT * FROM test_table WHERE test_int < 0")
        .partition_on("test_int", 3);
    let frame = fanload::read_sql(&fx.url, &request).await?;
    assert_eq!(frame.row_count(), 0);
    assert_eq!(frame.num_columns(), 8);
    assert_eq!(frame.schema()[0].canonical, CanonicalType::Int64);
    Ok(())
}

#[tokio::test]
async fn test_binary_column_encodings() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::query("SELECT id, data FROM blobs ORDER BY id");

    let raw = fanload::read_sql(&fx.url, &request).await?;
    let data = raw.column("data")?;
    assert_eq!(data.data_type(), &DataType::Binary);
    let values: Vec<Option<&[u8]>> = data.array().as_binary::<i32>().iter().collect();
    assert_eq!(values, vec![Some(&[0x00, 0xff, 0x10][..]), None, Some(&[][..])]);

    let config = LoaderConfig {
        binary_encoding: BinaryEncoding::Base64,
        ..Default::default()
    };
    let encoded = fanload::read_sql_with_config(&fx.url, &request, &config).await?;
    assert_eq!(encoded.schema()[1].canonical, CanonicalType::Binary);
    assert_eq!(encoded.column("data")?.data_type(), &DataType::Utf8);
    assert_eq!(
        strings(&encoded, "data"),
        vec![Some("AP8Q".to_string()), None, Some(String::new())]
    );
    Ok(())
}

#[tokio::test]
async fn test_statement_without_result_set() -> Result<()> {
    let fx = fixture()?;
    let frame = fanload::read_sql(&fx.url, &ReadRequest::query("PRAGMA foreign_keys = ON")).await?;
    assert_eq!(frame.num_columns(), 0);
    assert_eq!(frame.row_count(), 0);

    let err = fanload::read_sql(
        &fx.url,
        &ReadRequest::query("PRAGMA table_info(test_table)").partition_on("cid", 2),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    Ok(())
}

#[tokio::test]
async fn test_partition_sql_probes_range() -> Result<()> {
    let fx = fixture()?;
    let sql = fanload::partition_sql(&fx.url, "SELECT * FROM test_table", "test_int", 3, None).await?;
    assert_eq!(sql.len(), 3);
    assert!(sql[0].ends_with("fanload_part.test_int >= 0 AND fanload_part.test_int < 439"));
    assert!(sql[2].ends_with("fanload_part.test_int >= 878 AND fanload_part.test_int <= 1314"));
    Ok(())
}

#[tokio::test]
async fn test_get_meta_returns_schema_only() -> Result<()> {
    let fx = fixture()?;
    let schema = fanload::get_meta(&fx.url, "SELECT test_int, test_str, test_date FROM test_table").await?;
    let names: Vec<&str> = schema.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["test_int", "test_str", "test_date"]);
    assert_eq!(schema[2].canonical, CanonicalType::Date);
    Ok(())
}

#[tokio::test]
async fn test_bad_partition_column_fails_during_planning() -> Result<()> {
    let fx = fixture()?;
    let request = ReadRequest::query("SELECT * FROM test_table").partition_on("no_such_col", 2);
    let err = fanload::read_sql(&fx.url, &request).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::QueryExecution);

    let request = ReadRequest::query("SELECT * FROM test_table").partition_on("test_str", 2);
    let err = fanload::read_sql(&fx.url, &request).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    Ok(())
}

#[tokio::test]
async fn test_unknown_column_lookup_suggests_name() -> Result<()> {
    let fx = fixture()?;
    let frame = fanload::read_sql(&fx.url, &ReadRequest::query("SELECT test_int FROM test_table")).await?;
    let err = frame.column("test_imt").unwrap_err();
    assert_eq!(err.code, ErrorCode::ColumnNotFound);
    assert_eq!(err.hint.as_deref(), Some("Did you mean 'test_int'?"));
    Ok(())
}
