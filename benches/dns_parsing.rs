use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hermes_doh::dns::codec::{build_reply, parse, Answer};
use hermes_doh::dns::header::Header;
use hermes_doh::dns::name;
use hermes_doh::dns::{QType, RCode};

use bitstream_io::{BigEndian, BitWriter};

fn sample_query_packet() -> Vec<u8> {
    let header = Header {
        id: 0xABCD,
        qr: false,
        opcode: 0,
        aa: false,
        tc: false,
        rd: true,
        ra: false,
        z: 0,
        rcode: 0,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = BitWriter::endian(&mut bytes, BigEndian);
        header.write(&mut writer).unwrap();
    }
    bytes.extend(name::encode("bench.example.com"));
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes
}

fn bench_parse(c: &mut Criterion) {
    let packet = sample_query_packet();
    c.bench_function("codec::parse", |b| {
        b.iter(|| parse(black_box(&packet)).unwrap())
    });
}

fn bench_build_reply(c: &mut Criterion) {
    let packet = sample_query_packet();
    let query = parse(&packet).unwrap();
    let answers = vec![Answer {
        name: "bench.example.com".into(),
        qtype: QType::A,
        ttl: 60,
        data: "93.184.216.34".into(),
    }];
    c.bench_function("codec::build_reply", |b| {
        b.iter(|| build_reply(black_box(&query), black_box(&answers), RCode::NoError))
    });
}

fn bench_name_roundtrip(c: &mut Criterion) {
    c.bench_function("name::encode+decode", |b| {
        b.iter(|| {
            let encoded = name::encode(black_box("deep.sub.domain.bench.example.com"));
            name::decode(black_box(&encoded), 0).unwrap()
        })
    });
}

criterion_group!(benches, bench_parse, bench_build_reply, bench_name_roundtrip);
criterion_main!(benches);
