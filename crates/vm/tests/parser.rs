use vm::{parse_program, Instruction};

#[test]
fn parses_the_basic_forms() {
    let program = parse_program(
        "DECLARE x 42; WRITE 32 x; READ y 32; PRINT \"v=\" + y",
    )
    .unwrap();
    assert_eq!(
        program,
        vec![
            Instruction::Declare {
                var: "x".into(),
                value: 42
            },
            Instruction::Write {
                addr: 32,
                var: "x".into()
            },
            Instruction::Read {
                var: "y".into(),
                addr: 32
            },
            Instruction::Print {
                message: "v=".into(),
                var: Some("y".into())
            },
        ]
    );
}

#[test]
fn commas_between_operands_are_accepted() {
    let program = parse_program("DECLARE v, 7; ADD v, 3; SUBTRACT v, 1").unwrap();
    assert_eq!(program.len(), 3);
    assert_eq!(
        program[1],
        Instruction::Add {
            var: "v".into(),
            value: 3
        }
    );
}

#[test]
fn add_distinguishes_two_and_three_operand_forms() {
    let program = parse_program("ADD x 5; ADD sum a b").unwrap();
    assert_eq!(
        program,
        vec![
            Instruction::Add {
                var: "x".into(),
                value: 5
            },
            Instruction::AddVars {
                dst: "sum".into(),
                lhs: "a".into(),
                rhs: "b".into()
            },
        ]
    );
}

#[test]
fn print_accepts_parenthesized_form() {
    let program = parse_program("PRINT(\"hello\"); PRINT(\"x is \" + x)").unwrap();
    assert_eq!(
        program,
        vec![
            Instruction::Print {
                message: "hello".into(),
                var: None
            },
            Instruction::Print {
                message: "x is ".into(),
                var: Some("x".into())
            },
        ]
    );
}

#[test]
fn semicolons_inside_print_messages_do_not_split() {
    let program = parse_program("PRINT \"a;b;c\"").unwrap();
    assert_eq!(
        program,
        vec![Instruction::Print {
            message: "a;b;c".into(),
            var: None
        }]
    );
}

#[test]
fn for_loop_bodies_parse_and_may_nest() {
    let program = parse_program("FOR_LOOP 3 [ADD x 1; FOR_LOOP 2 [SUBTRACT x 1]]").unwrap();
    let Instruction::ForLoop { count, body } = &program[0] else {
        panic!("expected a loop");
    };
    assert_eq!(*count, 3);
    assert_eq!(body.len(), 2);
    assert!(matches!(body[1], Instruction::ForLoop { count: 2, .. }));
}

#[test]
fn values_clamp_to_sixteen_bits() {
    let program = parse_program("DECLARE x 70000").unwrap();
    assert_eq!(
        program[0],
        Instruction::Declare {
            var: "x".into(),
            value: (70000u32 % 65536) as u16
        }
    );
}

#[test]
fn hex_and_negative_addresses_are_carried_through() {
    let program = parse_program("READ v 0x80; WRITE -4 v").unwrap();
    assert_eq!(
        program[0],
        Instruction::Read {
            var: "v".into(),
            addr: 0x80
        }
    );
    assert_eq!(
        program[1],
        Instruction::Write {
            addr: -4,
            var: "v".into()
        }
    );
}

#[test]
fn rejects_garbage() {
    assert!(parse_program("").is_err());
    assert!(parse_program("   ;  ; ").is_err());
    assert!(parse_program("HALT").is_err());
    assert!(parse_program("DECLARE 5 x").is_err());
    assert!(parse_program("DECLARE x").is_err());
    assert!(parse_program("ADD x y z w").is_err());
    assert!(parse_program("READ v notanumber").is_err());
    assert!(parse_program("FOR_LOOP x [ADD x 1]").is_err());
    assert!(parse_program("FOR_LOOP 3 []").is_err());
    assert!(parse_program("PRINT hello").is_err());
}

#[test]
fn error_names_the_offending_statement() {
    let err = parse_program("DECLARE x 1; BOGUS; DECLARE y 2").unwrap_err();
    assert_eq!(err.statement, 2);
    assert!(err.message.contains("BOGUS"));
}
