use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use eid_pace::crypt::NativeCrypto;
use eid_pace::iso7816::apdu::{Apdu, CommandHeader, Data};
use eid_pace::iso7816::card::{CommunicationError, SmartCard};
use eid_pace::iso7816::reader::{PaceEstablishChannelRequest, PaceReaderFeature};
use eid_pace::pace::{PaceEngine, PaceRequest};
use eid_pace::password::PasswordId;
use tracing::{debug, error, info};
use zeroize::Zeroizing;


#[derive(Clone, Debug, Parser)]
#[command(name = "pace-tool", about = "Establishes PACE with an identity document on a PC/SC reader")]
struct Cli {
    /// Log filter used if RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    mode: Mode,
}


#[derive(Clone, Debug, Subcommand)]
enum Mode {
    /// Lists the PC/SC readers.
    ListReaders,

    /// Shows the PACE capabilities of a reader.
    Capabilities {
        #[arg(short, long = "reader", default_value = "0")]
        reader_index: usize,
    },

    /// Runs PACE and reads an elementary file over Secure Messaging.
    Establish(EstablishOpts),
}


#[derive(Clone, Debug, Args)]
struct EstablishOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,

    /// Password type: mrz, can, pin, puk or the numeric reference.
    #[arg(short, long = "password", default_value = "can")]
    pub password_id: PasswordId,

    /// The password; for the MRZ, document number, birth date and expiry date with check digits.
    #[arg(short, long, conflicts_with = "secret_path")]
    pub secret: Option<String>,

    /// A file containing the password.
    #[arg(long = "secret-file")]
    pub secret_path: Option<PathBuf>,

    /// Certificate holder authorization template, hex-encoded.
    #[arg(long)]
    pub chat: Option<String>,

    /// A file containing the DER-encoded certificate description, shown by readers running PACE
    /// themselves.
    #[arg(long = "certificate-description")]
    pub certificate_description_path: Option<PathBuf>,

    /// Let the reader run PACE (PC/SC part 10 amendment 1) instead of the host.
    #[arg(long)]
    pub reader_pace: bool,

    /// The file identifier of the elementary file to read after PACE, hex-encoded.
    #[arg(short, long, default_value = "011E")]
    pub file: String,
}


fn init_logging(level: &str) -> Result<(), String> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .map_err(|e| format!("invalid log filter: {}", e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
    Ok(())
}


fn connect(ctx: &pcsc::Context, reader_index: usize) -> Result<pcsc::Card, String> {
    let mut readers_buf = vec![0u8; ctx.list_readers_len().map_err(|e| format!("failed to list readers: {}", e))?];
    let mut readers = ctx.list_readers(&mut readers_buf)
        .map_err(|e| format!("failed to list readers: {}", e))?;
    let reader = readers.nth(reader_index)
        .ok_or_else(|| format!("no reader at index {}", reader_index))?;
    info!(?reader, "connecting");
    ctx.connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)
        .map_err(|e| format!("failed to connect to card: {}", e))
}


fn read_secret(opts: &EstablishOpts) -> Result<Zeroizing<Vec<u8>>, String> {
    match (&opts.secret, &opts.secret_path) {
        (Some(secret), _) => Ok(Zeroizing::new(secret.trim().as_bytes().to_vec())),
        (None, Some(path)) => {
            let contents = Zeroizing::new(std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?);
            Ok(Zeroizing::new(contents.trim().as_bytes().to_vec()))
        },
        // an empty password makes a reader with a PIN pad ask for it
        (None, None) => Ok(Zeroizing::new(Vec::new())),
    }
}


fn read_file<SC: SmartCard + ?Sized>(card: &mut SC, file_id: &[u8]) -> Result<Vec<u8>, CommunicationError> {
    let select = Apdu::new(
        CommandHeader {
            cla: 0x00,
            ins: 0xA4, // SELECT
            p1: 0b000_000_10, // select EF under current DF
            p2: 0b0000_11_00, // return no metadata, return first or only occurrence
        },
        Data::RequestDataShort { request_data: file_id.to_vec() },
    );
    let response = card.communicate(&select)?;
    debug!(status_word = response.status_word(), "SELECT");

    let mut contents = Vec::new();
    loop {
        let Ok(offset) = u16::try_from(contents.len()) else { break };
        let [p1, p2] = offset.to_be_bytes();
        let read_binary = Apdu::new(
            CommandHeader {
                cla: 0x00,
                ins: 0xB0, // READ BINARY
                p1,
                p2,
            },
            Data::ResponseDataShort { response_data_length: 0xDF },
        );
        let response = card.communicate(&read_binary)?;
        let status_word = response.status_word();
        let finished = response.data.len() < 0xDF || status_word != 0x9000;
        contents.extend(response.data);
        if finished {
            debug!(status_word, length = contents.len(), "READ BINARY finished");
            break;
        }
    }
    Ok(contents)
}


fn run(mode: Mode) -> Result<(), String> {
    let ctx = pcsc::Context::establish(pcsc::Scope::User)
        .map_err(|e| format!("failed to establish PC/SC user context: {}", e))?;

    match mode {
        Mode::ListReaders => {
            let mut readers_buf = vec![0u8; ctx.list_readers_len().map_err(|e| format!("failed to list readers: {}", e))?];
            let readers = ctx.list_readers(&mut readers_buf)
                .map_err(|e| format!("failed to list readers: {}", e))?;
            for (i, reader) in readers.enumerate() {
                println!("{}: {:?}", i, reader);
            }
        },
        Mode::Capabilities { reader_index } => {
            let mut card = connect(&ctx, reader_index)?;
            let mut feature = PaceReaderFeature::discover(&mut card)
                .map_err(|e| format!("reader does not offer PACE: {}", e))?;
            let capabilities = feature.get_capabilities()
                .map_err(|e| format!("failed to query capabilities: {}", e))?;
            for capability in capabilities {
                println!("{:?}", capability);
            }
        },
        Mode::Establish(opts) => {
            let secret = read_secret(&opts)?;
            let chat = opts.chat.as_deref()
                .map(hex::decode)
                .transpose()
                .map_err(|e| format!("invalid CHAT: {}", e))?;
            let file_id = hex::decode(&opts.file)
                .map_err(|e| format!("invalid file identifier: {}", e))?;
            let mut request = PaceRequest::new(opts.password_id, &secret);
            if let Some(chat) = chat {
                request = request.with_chat(chat);
            }
            if let Some(path) = &opts.certificate_description_path {
                let certificate_description = std::fs::read(path)
                    .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
                request = request.with_certificate_description(certificate_description);
            }
            let mut card = connect(&ctx, opts.reader_index)?;

            if opts.reader_pace {
                let mut feature = PaceReaderFeature::discover(&mut card)
                    .map_err(|e| format!("reader does not offer PACE: {}", e))?;
                let response = feature.establish_channel(&PaceEstablishChannelRequest::from(&request))
                    .map_err(|e| format!("reader failed to establish PACE: {}", e))?;
                println!("MSE:Set AT status: {:04X}", response.mse_status_word);
                println!("EF.CardAccess:");
                print!("{}", eid_pace::hexdump(&response.ef_card_access));
                println!("ID_PICC:");
                print!("{}", eid_pace::hexdump(&response.chip_identifier));
                return Ok(());
            }

            let mut engine = PaceEngine::new(NativeCrypto);
            let mut established = engine.establish(&mut card, &request)
                .map_err(|e| format!("failed to establish PACE ({}): {}", e.kind(), e))?;
            if let Some(retries) = established.retry_counter() {
                println!("password retries left: {}", retries);
            }
            if let Some(car) = &established.current_car {
                println!("current CAR: {}", String::from_utf8_lossy(car));
            }
            println!("ID_PICC:");
            print!("{}", eid_pace::hexdump(&established.chip_identifier));

            let contents = read_file(&mut established.channel, &file_id)
                .map_err(|e| format!("failed to read file {}: {}", opts.file, e))?;
            println!("file {}:", opts.file);
            print!("{}", eid_pace::hexdump(&contents));
        },
    }
    Ok(())
}


fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        },
    }
}
