use num_derive::{FromPrimitive, ToPrimitive};

/// MySQL packet header: 3-byte little-endian payload length + sequence id.
pub const PACKET_HEADER_LEN: usize = 4;

/// First byte of a COM_STMT_PREPARE OK response.
pub const STMT_PREPARE_OK: u8 = 0x00;

/// Compressed-packet header: 3-byte compressed length, 1-byte sequence id,
/// 3-byte uncompressed length.
pub const COMPRESSED_HEADER_LEN: usize = 7;

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComFieldList,
    ComCreateDB,
    ComDropDB,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}

/// Binary-protocol type codes.
/// See <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_binary_resultset.html>
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum DataType {
    TypeDecimal = 0x00,
    TypeTiny = 0x01,
    TypeShort = 0x02,
    TypeLong = 0x03,
    TypeFloat = 0x04,
    TypeDouble = 0x05,
    TypeNull = 0x06,
    TypeTimestamp = 0x07,
    TypeLonglong = 0x08,
    TypeInt24 = 0x09,
    TypeDate = 0x0a,
    TypeTime = 0x0b,
    TypeDatetime = 0x0c,
    TypeYear = 0x0d,
    TypeNewdate = 0x0e,
    TypeVarchar = 0x0f,
    TypeBit = 0x10,
    TypeNewdecimal = 0xf6,
    TypeEnum = 0xf7,
    TypeSet = 0xf8,
    TypeTinyBlob = 0xf9,
    TypeMediumblob = 0xfa,
    TypeLongblob = 0xfb,
    TypeBlob = 0xfc,
    TypeVarString = 0xfd,
    TypeString = 0xfe,
    TypeGeometry = 0xff,
}
